//! Alert text for a reported listing.
//!
//! Annotators run in a fixed order on the base message: detected specs,
//! returning-model note, good-deal tag.

use super::listing::Listing;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A listing gone quiet this many days is announced as returning
pub const RETURNING_AFTER_DAYS: i64 = 3;

static SPEC_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("CPU", Regex::new(r"(i[579]-\d{4,5}[a-z]*)|(ryzen\s[579]\s\d{4,5}[a-z]*)").unwrap()),
        ("GPU", Regex::new(r"(rtx\s?\d{4})|(rx\s?\d{4,5}[a-z]*)").unwrap()),
        ("RAM", Regex::new(r"(\d{1,3})\s?gb\s?(ram)?").unwrap()),
        ("SSD", Regex::new(r"((\d+(\.\d+)?\s?tb)|(\d+\s?gb))\s?(ssd|nvme)").unwrap()),
    ]
});

static SCREEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(\d{2}\.\d?)\s?("|”|in)"#).unwrap());

/// Bullet lines for the hardware specs found in a title
pub fn detect_specs(title: &str) -> Vec<String> {
    let title = title.to_lowercase();
    let mut specs: Vec<String> = SPEC_PATTERNS
        .iter()
        .filter_map(|(label, re)| {
            re.find(&title)
                .map(|m| format!("• {}: {}", label, m.as_str().to_uppercase()))
        })
        .collect();

    if let Some(caps) = SCREEN_PATTERN.captures(&title) {
        specs.push(format!("• Screen: {}\"", &caps[1]));
    }
    specs
}

/// Note for a listing based on its previous sighting
pub fn returning_note(previous: Option<NaiveDate>, today: NaiveDate) -> Option<String> {
    match previous {
        None => Some("🆕 First time this model is seen.".to_string()),
        Some(last) => {
            let days = (today - last).num_days();
            (days >= RETURNING_AFTER_DAYS)
                .then(|| format!("📢 This model has not been seen for *{} days*.", days))
        }
    }
}

/// Whether the listing is under the ceiling of the first GPU named in its title
pub fn is_good_deal(listing: &Listing, limits: &BTreeMap<String, f64>) -> bool {
    let title = listing.title_lower();
    limits
        .iter()
        .any(|(gpu, ceiling)| title.contains(gpu.as_str()) && listing.price <= *ceiling)
}

/// Full alert message for `listing`
pub fn format_alert(
    listing: &Listing,
    previous: Option<NaiveDate>,
    today: NaiveDate,
    limits: &BTreeMap<String, f64>,
) -> String {
    let mut text = format!("🎯 *{}*\n💲 {}\n🔗 {}", listing.title, listing.price_text, listing.url);

    let specs = detect_specs(&listing.title);
    if !specs.is_empty() {
        text.push_str("\n🧠 *Detected specs:*\n");
        text.push_str(&specs.join("\n"));
    }

    if let Some(note) = returning_note(previous, today) {
        text.push('\n');
        text.push_str(&note);
    }

    if is_good_deal(listing, limits) {
        text.push_str("\n🏷️ *GOOD DEAL*");
    }

    text
}
