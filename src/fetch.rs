use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Url;
use tracing::{debug, info};

use crate::config::{FetchSettings, SearchSettings};
use crate::error::FetchError;
use crate::models::SearchPartition;
use crate::retry::RetryPolicy;

/// Source of raw search-result documents.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Search URL for one partition, parameters in the order the site itself uses.
pub fn search_url(search: &SearchSettings, partition: &SearchPartition) -> Result<String, FetchError> {
    let recency = format!("r{}", u64::from(search.posted_within_minutes) * 60);
    let keywords = search.keywords.trim().to_lowercase();
    let url = Url::parse_with_params(
        &search.base_url,
        &[
            ("f_TPR", recency.as_str()),
            ("geoId", partition.location_id.as_str()),
            ("keywords", keywords.as_str()),
            ("origin", "JOB_SEARCH_PAGE_LOCATION_AUTOCOMPLETE"),
            ("start", "0"),
        ],
    )
    .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", search.base_url, e)))?;
    Ok(url.into())
}

pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.timeout())
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(settings.attempts, settings.retry_delay()),
        })
    }

    fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        info!(url, "fetching search results");
        let body = self.retry.run(
            "fetch",
            |attempt| {
                debug!(url, attempt, "GET");
                self.get_once(url)
            },
            FetchError::is_retryable,
        )?;
        debug!(bytes = body.len(), "fetched document");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> SearchPartition {
        SearchPartition {
            name: "NYC".to_string(),
            location_id: "90000070".to_string(),
            channel: None,
            remote_only: false,
        }
    }

    #[test]
    fn test_search_url_parameters() {
        let url = search_url(&SearchSettings::default(), &partition()).unwrap();
        assert_eq!(
            url,
            "https://www.linkedin.com/jobs/search/?f_TPR=r1800&geoId=90000070\
             &keywords=associate+product+manager\
             &origin=JOB_SEARCH_PAGE_LOCATION_AUTOCOMPLETE&start=0"
        );
    }

    #[test]
    fn test_search_url_lowercases_keywords_and_scales_window() {
        let settings = SearchSettings {
            base_url: "https://jobs.example.com/search".to_string(),
            keywords: "  Product Manager ".to_string(),
            posted_within_minutes: 60,
        };
        let url = search_url(&settings, &partition()).unwrap();
        assert!(url.starts_with("https://jobs.example.com/search?f_TPR=r3600&"));
        assert!(url.contains("keywords=product+manager"));
    }

    #[test]
    fn test_invalid_base_url() {
        let settings = SearchSettings {
            base_url: "not a url".to_string(),
            ..SearchSettings::default()
        };
        assert!(matches!(
            search_url(&settings, &partition()),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(FetchError::Timeout("slow".into()).is_retryable());
    }
}
