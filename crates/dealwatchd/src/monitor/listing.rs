//! Listing extraction and filtering for search result pages.

use super::ScrapeError;
use scraper::{Html, Selector};

/// One search result as it appears on the page
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub title: String,
    /// Price as displayed, e.g. "$1,299.99"
    pub price_text: String,
    pub price: f64,
    pub url: String,
}

impl Listing {
    pub fn title_lower(&self) -> String {
        self.title.to_lowercase()
    }
}

/// Extract up to `max_items` listings from a result page.
///
/// Items missing a title, link or price, or with an unparsable price, are
/// skipped without error.
pub fn parse_listings(html: &str, max_items: usize) -> Result<Vec<Listing>, ScrapeError> {
    let document = Html::parse_document(html);

    let item_sel = selector(".s-item")?;
    let title_sel = selector(".s-item__title")?;
    let link_sel = selector("a.s-item__link")?;
    let price_sel = selector(".s-item__price")?;

    let listings = document
        .select(&item_sel)
        .take(max_items)
        .filter_map(|item| {
            let title = item.select(&title_sel).next()?.text().collect::<String>();
            let url = item.select(&link_sel).next()?.value().attr("href")?.to_string();
            let price_text = item.select(&price_sel).next()?.text().collect::<String>();
            let price = parse_price(&price_text)?;
            Some(Listing {
                title: title.trim().to_string(),
                price_text: price_text.trim().to_string(),
                price,
                url,
            })
        })
        .collect();

    Ok(listings)
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Parse(format!("{}: {}", css, e)))
}

/// "$1,299.99" -> 1299.99. Ranges like "$900.00 to $1,100.00" take the low end.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned = text.replace(['$', ','], "");
    cleaned.split_whitespace().next()?.parse().ok()
}

/// Which listings are worth reporting
#[derive(Debug, Clone)]
pub struct ListingFilter {
    /// Lowercase fragments, at least one must appear in the title
    pub keywords: Vec<String>,
    pub max_price: f64,
    pub url_prefix: String,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        let title = listing.title_lower();
        listing.price <= self.max_price && self.keywords.iter().any(|k| title.contains(k.as_str()))
    }

    pub fn valid_url(&self, url: &str) -> bool {
        url.starts_with(&self.url_prefix)
    }
}
