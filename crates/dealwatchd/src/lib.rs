//! dealwatchd library - exposes modules for the binary and integration tests.

pub mod commands;
pub mod config;
pub mod monitor;
pub mod notifier;
pub mod ota;
pub mod restart;
pub mod telegram;
