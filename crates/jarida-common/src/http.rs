use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::JaridaError;

/// A capability-capped HTTP client: requests are only allowed to the gazette
/// portal and the configured AI-provider hosts. Every outbound call in the
/// pipeline goes through this client, so a misconfigured URL fails loudly
/// instead of leaking requests to arbitrary hosts.
#[derive(Debug, Clone)]
pub struct CappedClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl CappedClient {
    /// Build a client allowing the given hostnames (exact match or subdomain).
    /// Cookies are enabled because the portal session is cookie-based.
    pub fn new<I, S>(hosts: I, timeout: Duration) -> Result<Self, JaridaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowlist: HashSet<String> = hosts.into_iter().map(Into::into).collect();
        let client = ClientBuilder::new()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent("Jarida/0.1 (gazette ingestion)")
            .build()
            .map_err(|e| JaridaError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, allowlist })
    }

    /// Append an exact hostname to the allowlist.
    pub fn allow_host(&mut self, host: &str) {
        self.allowlist.insert(host.to_string());
    }

    /// Whether a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{allowed}")) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, JaridaError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, JaridaError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    pub fn request(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::RequestBuilder, JaridaError> {
        self.check(url)?;
        Ok(self.client.request(method, url))
    }

    fn check(&self, url: &str) -> Result<(), JaridaError> {
        if !self.is_allowed(url) {
            return Err(JaridaError::DomainBlocked(url.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CappedClient {
        CappedClient::new(
            ["gazette.example.gov", "api.mistral.ai"],
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn exact_host_allowed() {
        assert!(client().is_allowed("https://gazette.example.gov/online/AdsCategoryJson"));
    }

    #[test]
    fn subdomain_allowed() {
        assert!(client().is_allowed("https://files.api.mistral.ai/v1/files"));
    }

    #[test]
    fn unknown_host_blocked() {
        let c = client();
        assert!(!c.is_allowed("https://evil.example.com/"));
        assert!(matches!(
            c.get("https://evil.example.com/"),
            Err(JaridaError::DomainBlocked(_))
        ));
    }

    #[test]
    fn malformed_url_blocked() {
        assert!(!client().is_allowed("not a url"));
    }
}
