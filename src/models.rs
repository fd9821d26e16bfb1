use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationKind {
    Remote,
    Hybrid,
    OnSite,
    Unknown,
}

impl LocationKind {
    /// Location text wins over the summary; "remote" is checked before "hybrid".
    pub fn classify(location: &str, summary: Option<&str>) -> Self {
        let location = location.to_lowercase();
        let summary = summary.unwrap_or_default().to_lowercase();

        if location.trim().is_empty() && summary.trim().is_empty() {
            return LocationKind::Unknown;
        }

        for text in [&location, &summary] {
            if text.contains("remote") {
                return LocationKind::Remote;
            }
            if text.contains("hybrid") {
                return LocationKind::Hybrid;
            }
        }

        LocationKind::OnSite
    }

    pub fn label(&self) -> &'static str {
        match self {
            LocationKind::Remote => "Remote",
            LocationKind::Hybrid => "Hybrid",
            LocationKind::OnSite => "On-site",
            LocationKind::Unknown => "Unknown",
        }
    }
}

/// One posting as it appeared on a search-result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub title: String,
    pub organization: String,
    pub location: String,
    pub location_kind: LocationKind,
    pub compensation_min: Option<i64>,
    pub compensation_max: Option<i64>,
    pub compensation_text: Option<String>,
    pub posted_age_text: String,
    pub external_id: Option<String>, // source-assigned, e.g. LinkedIn job posting id
    pub detail_url: String,
    pub organization_career_url: Option<String>,
    pub summary: Option<String>,
}

impl ListingRecord {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.organization, &self.location)
    }
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn fingerprint(title: &str, organization: &str, location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(organization).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(location).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenStatus {
    New,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenRecord {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub notified: bool,
    // informational, captured on first insert
    pub partition: Option<String>,
    pub title: Option<String>,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub detail_url: Option<String>,
}

/// A market the orchestrator searches independently on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPartition {
    pub name: String,
    pub location_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub remote_only: bool,
}

#[derive(Debug, Clone)]
pub struct SearchLog {
    pub partition: String,
    pub search_url: String,
    pub records_found: usize,
    pub records_new: usize,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_seen: i64,
    pub seen_today: i64,
    pub unnotified: i64,
    pub total_searches: i64,
    pub failed_searches_today: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_case_and_whitespace() {
        let a = fingerprint("Associate Product Manager", "Acme Corp", "New York, NY");
        let b = fingerprint("  associate   PRODUCT manager ", "acme\tcorp", "new york,  ny\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_fields() {
        let a = fingerprint("Product Manager", "Acme", "Remote");
        let b = fingerprint("Product Manager", "Acme", "New York, NY");
        let c = fingerprint("Acme", "Product Manager", "Remote");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_classify_location_kind() {
        assert_eq!(LocationKind::classify("United States (Remote)", None), LocationKind::Remote);
        assert_eq!(LocationKind::classify("San Francisco, CA (Hybrid)", None), LocationKind::Hybrid);
        assert_eq!(LocationKind::classify("Los Angeles, CA", None), LocationKind::OnSite);
        assert_eq!(LocationKind::classify("", None), LocationKind::Unknown);
        assert_eq!(LocationKind::classify("  ", Some("")), LocationKind::Unknown);
    }

    #[test]
    fn test_classify_falls_back_to_summary() {
        assert_eq!(
            LocationKind::classify("New York, NY", Some("This role is fully remote")),
            LocationKind::Remote
        );
        assert_eq!(
            LocationKind::classify("", Some("Hybrid schedule, 3 days in office")),
            LocationKind::Hybrid
        );
        // location keywords take precedence over the summary
        assert_eq!(
            LocationKind::classify("Austin, TX (Hybrid)", Some("remote friendly team")),
            LocationKind::Hybrid
        );
    }
}
