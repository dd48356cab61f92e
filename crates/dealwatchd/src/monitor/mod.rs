//! Listing monitor - polls a marketplace search page and reports matches.
//!
//! Each cycle fetches the page, keeps the listings that pass the filter and
//! were not reported before in this process, annotates them against the
//! sighting history and sends one notification per listing.

pub mod annotate;
pub mod history;
pub mod listing;

pub use history::{History, Sighting};
pub use listing::{parse_listings, Listing, ListingFilter};

use crate::config::MonitorConfig;
use crate::notifier::Notifier;
use chrono::{NaiveDate, Utc};
use dealwatch_shared::EventLog;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("History error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A listing ready to be reported
#[derive(Debug, Clone)]
pub struct Alert {
    pub listing: Listing,
    pub text: String,
}

pub struct ListingMonitor {
    config: MonitorConfig,
    filter: ListingFilter,
    history_path: PathBuf,
    http: reqwest::Client,
    seen: Mutex<HashSet<String>>,
    notifier: Arc<dyn Notifier>,
    log: EventLog,
}

impl ListingMonitor {
    pub fn new(config: MonitorConfig, notifier: Arc<dyn Notifier>, log: EventLog) -> Self {
        let filter = ListingFilter {
            keywords: config.keywords.iter().map(|k| k.to_lowercase()).collect(),
            max_price: config.max_price,
            url_prefix: config.url_prefix.clone(),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(format!("dealwatchd/{}", dealwatch_shared::VERSION))
            .build()
            .unwrap_or_default();

        Self {
            history_path: config.history_path(),
            config,
            filter,
            http,
            seen: Mutex::new(HashSet::new()),
            notifier,
            log,
        }
    }

    async fn fetch_page(&self) -> Result<String, ScrapeError> {
        let response = self.http.get(&self.config.url).send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Turn a result page into alerts and update the sighting history.
    ///
    /// The returning-model note compares against the sighting before
    /// today's, which is appended afterwards.
    pub fn scan(&self, html: &str, today: NaiveDate) -> Result<Vec<Alert>, ScrapeError> {
        let listings = parse_listings(html, self.config.max_items)?;
        let mut history = History::load(&self.history_path)?;
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        // Only marked as seen once the history is saved, so a failed cycle is retried
        let mut fresh = HashSet::new();
        let mut alerts = Vec::new();

        for listing in listings {
            if seen.contains(&listing.url)
                || fresh.contains(&listing.url)
                || !self.filter.matches(&listing)
            {
                continue;
            }
            if !self.filter.valid_url(&listing.url) {
                self.log.record(
                    "invalid_link",
                    json!({"title": listing.title, "url": listing.url}),
                );
                continue;
            }

            fresh.insert(listing.url.clone());
            let previous = history.last_seen(&listing.url);
            let text = annotate::format_alert(&listing, previous, today, &self.config.deal_limits);
            history.record(
                &listing.url,
                Sighting {
                    date: today,
                    price: listing.price,
                    title: listing.title.clone(),
                },
            );
            alerts.push(Alert { listing, text });
        }

        history.save()?;
        seen.extend(fresh);
        Ok(alerts)
    }

    async fn report(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            self.notifier.notify("⚠️ No matching listings found.").await;
            self.log
                .record("no_results", json!({"message": "No matching listings found."}));
            return;
        }
        for alert in alerts {
            self.notifier.notify(&alert.text).await;
            self.log.record(
                "notification_sent",
                json!({
                    "title": alert.listing.title,
                    "price": alert.listing.price,
                    "url": alert.listing.url,
                }),
            );
        }
    }

    /// One fetch-scan-report cycle. Failures are reported before returning.
    pub async fn run_once(&self) -> Result<usize, ScrapeError> {
        let result = match self.fetch_page().await {
            Ok(html) => self.scan(&html, Utc::now().date_naive()),
            Err(e) => Err(e),
        };

        match result {
            Ok(alerts) => {
                info!("🔎  Listing scan found {} new match(es)", alerts.len());
                self.report(&alerts).await;
                Ok(alerts.len())
            }
            Err(e) => {
                warn!("Listing scan failed: {}", e);
                self.notifier
                    .notify(&format!("❌ Error while monitoring listings: {}", e))
                    .await;
                self.log.record("scrape_error", json!({"error": e.to_string()}));
                Err(e)
            }
        }
    }

    /// Scan every `interval_secs`, or `error_backoff_secs` after a failure
    pub async fn run(&self, cancel: CancellationToken) {
        info!("🔎  Listing monitor started (every {}s)", self.config.interval_secs);
        loop {
            let wait = match self.run_once().await {
                Ok(_) => self.config.interval_secs,
                Err(_) => self.config.error_backoff_secs,
            };
            debug!("Next listing scan in {}s", wait);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            }
        }
        info!("Listing monitor stopped");
    }
}
