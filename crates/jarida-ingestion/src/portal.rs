//! Gazette portal client.
//!
//! The portal is an ASP.NET site: cookie session, anti-forgery token on the
//! login form, and a DataTables-style JSON endpoint for category listings.
//! Dates come back as .NET `/Date(ms)/` tokens.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use jarida_common::config::PortalConfig;
use jarida_common::http::CappedClient;
use jarida_common::{JaridaError, Result};

use crate::models::Listing;

lazy_static::lazy_static! {
    static ref DOTNET_DATE: Regex = Regex::new(r"/Date\((-?\d+)\)/").unwrap();
}

/// A page of listings plus the portal's total count for the query.
#[derive(Debug)]
pub struct ListingPage {
    pub listings: Vec<Listing>,
    pub total_available: usize,
}

pub struct PortalClient {
    http:          CappedClient,
    cfg:           PortalConfig,
    authenticated: AtomicBool,
}

impl PortalClient {
    pub fn new(cfg: PortalConfig) -> Result<Self> {
        let host = reqwest::Url::parse(&cfg.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| JaridaError::Config(format!("invalid portal URL: {}", cfg.base_url)))?;
        let http = CappedClient::new([host], Duration::from_secs(cfg.timeout_secs))?;
        Ok(Self { http, cfg, authenticated: AtomicBool::new(false) })
    }

    pub fn http(&self) -> &CappedClient {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    /// Establish a session. Fails fast on rejected credentials; never
    /// degrades to silent empty results.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<()> {
        let login_url = format!("{}/Account/Login", self.cfg.base_url);

        let page = self.http.get(&login_url)?.send().await?.text().await?;
        let token = extract_verification_token(&page).ok_or_else(|| {
            JaridaError::Auth("login page has no __RequestVerificationToken".to_string())
        })?;

        let form = [
            ("UserName", self.cfg.username.as_str()),
            ("Password", self.cfg.password.expose_secret()),
            ("__RequestVerificationToken", token.as_str()),
            ("RememberMe", "false"),
        ];
        let body = self
            .http
            .post(&login_url)?
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        // A logged-in response carries the logout link.
        if body.contains("تسجيل الخروج") || body.contains("المستخدم") {
            info!("Portal session established");
            self.authenticated.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            self.authenticated.store(false, Ordering::SeqCst);
            Err(JaridaError::Auth("credentials rejected by portal".to_string()))
        }
    }

    /// Fetch one page of listings for a category.
    #[instrument(skip(self), fields(category, offset))]
    pub async fn fetch_page(
        &self,
        category: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<ListingPage> {
        let api_url = format!("{}/online/AdsCategoryJson", self.cfg.base_url);
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(self.cfg.days_back);

        let form = [
            ("draw", "1".to_string()),
            ("start", offset.to_string()),
            ("length", page_size.to_string()),
            ("ID", category.to_string()),
            ("AdsTitle", String::new()),
            ("EditionNo", String::new()),
            ("startdate", start.format("%Y/%m/%d").to_string()),
            ("enddate", end.format("%Y/%m/%d").to_string()),
        ];

        let body = self
            .http
            .post(&api_url)?
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            // An expired session answers with the login page instead of JSON.
            self.authenticated.store(false, Ordering::SeqCst);
            JaridaError::Auth("portal returned non-JSON listing response".to_string())
        })?;

        let total = parsed["recordsTotal"].as_u64().unwrap_or(0) as usize;
        let rows = parsed["data"].as_array().cloned().unwrap_or_default();
        let listings: Vec<Listing> = rows
            .iter()
            .filter_map(|row| parse_listing_row(row, category))
            .collect();

        debug!(category, offset, n = listings.len(), total, "Listing page fetched");
        Ok(ListingPage { listings, total_available: total })
    }

    /// Page through a category exhaustively, re-authenticating once if the
    /// session expires mid-run. Stops at `max_listings` regardless of what
    /// the portal claims is available.
    #[instrument(skip(self))]
    pub async fn list_category(&self, category: &str) -> Result<Vec<Listing>> {
        if !self.authenticated.load(Ordering::SeqCst) {
            self.login().await?;
        }

        let mut collected: Vec<Listing> = Vec::new();
        let mut reauthed = false;

        loop {
            let page = match self.fetch_page(category, collected.len(), self.cfg.page_size).await {
                Ok(p) => p,
                Err(JaridaError::Auth(msg)) if !reauthed => {
                    warn!(category, %msg, "Session expired, re-authenticating");
                    reauthed = true;
                    self.login().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let fetched = page.listings.len();
            collected.extend(page.listings);

            if fetched == 0
                || collected.len() >= page.total_available
                || collected.len() >= self.cfg.max_listings
            {
                break;
            }
        }

        collected.truncate(self.cfg.max_listings);
        info!(category, n = collected.len(), "Category listing complete");
        Ok(collected)
    }
}

/// Pull the anti-forgery token out of the login form.
fn extract_verification_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse(r#"input[name="__RequestVerificationToken"]"#).ok()?;
    doc.select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

/// Parse one DataTables row into a Listing. Rows without an id or title are
/// dropped.
fn parse_listing_row(row: &serde_json::Value, category: &str) -> Option<Listing> {
    let external_id = match &row["ID"] {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    let title = row["AdsTitle"].as_str()?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let edition_no = match &row["EditionNo"] {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    Some(Listing {
        external_id,
        title,
        category: category.to_string(),
        edition_no,
        edition_id: row["EditionID_FK"].as_i64(),
        page_number: row["FromPage"].as_i64(),
        publish_date: row["EditionDate"].as_str().and_then(parse_dotnet_date),
        hijri_date: row["HijriDate"].as_str().map(str::to_string),
    })
}

/// Parse a .NET JSON date token like `/Date(1761426000000)/` (milliseconds
/// since the Unix epoch) into a date.
pub fn parse_dotnet_date(token: &str) -> Option<NaiveDate> {
    let millis: i64 = DOTNET_DATE.captures(token)?.get(1)?.as_str().parse().ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotnet_date_token_parses() {
        // 2025-10-25T21:00:00Z
        let d = parse_dotnet_date("/Date(1761426000000)/").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 10, 25).unwrap());
    }

    #[test]
    fn malformed_date_token_is_none() {
        assert!(parse_dotnet_date("2025-10-25").is_none());
        assert!(parse_dotnet_date("/Date(abc)/").is_none());
    }

    #[test]
    fn verification_token_extracted() {
        let html = r#"<form action="/Account/Login" method="post">
            <input name="__RequestVerificationToken" type="hidden" value="tok-123"/>
            <input name="UserName"/></form>"#;
        assert_eq!(extract_verification_token(html).as_deref(), Some("tok-123"));
        assert!(extract_verification_token("<html><body>no form</body></html>").is_none());
    }

    #[test]
    fn listing_row_parses_numeric_and_string_ids() {
        let row = serde_json::json!({
            "ID": 4471,
            "AdsTitle": "مناقصة رقم أ/2025/14",
            "EditionNo": 1680,
            "EditionDate": "/Date(1761426000000)/",
            "HijriDate": "4 جمادى الأولى 1447",
            "EditionID_FK": 912,
            "FromPage": 33
        });
        let l = parse_listing_row(&row, "1").unwrap();
        assert_eq!(l.external_id, "4471");
        assert_eq!(l.edition_no.as_deref(), Some("1680"));
        assert_eq!(l.edition_id, Some(912));
        assert_eq!(l.page_number, Some(33));
        assert!(l.publish_date.is_some());
    }

    #[test]
    fn listing_row_without_title_dropped() {
        let row = serde_json::json!({ "ID": 1, "AdsTitle": "" });
        assert!(parse_listing_row(&row, "1").is_none());
    }
}
