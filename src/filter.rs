use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::config::FilterSettings;
use crate::models::{ListingRecord, LocationKind, SearchPartition};

const US_STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

const CA_PROVINCE_CODES: &[&str] = &["AB", "BC", "MB", "NB", "NL", "NS", "ON", "PE", "QC", "SK"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    NoKeywordMatch,
    ExcludedKeyword,
    RemoteOutOfRegion,
    /// Record does not fit the partition's criteria (non-remote in a remote-only market).
    OutsidePartition,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            RejectReason::NoKeywordMatch => "no_keyword_match",
            RejectReason::ExcludedKeyword => "excluded_keyword",
            RejectReason::RemoteOutOfRegion => "remote_out_of_region",
            RejectReason::OutsidePartition => "outside_partition",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Keyword classifier. Stateless after construction: the same record always
/// gets the same decision.
pub struct RelevanceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    accepted_regions: Vec<String>,
    rejected_regions: Vec<String>,
    state_suffix: Regex,
}

impl RelevanceFilter {
    pub fn new(settings: &FilterSettings) -> Result<Self> {
        let lowered = |phrases: &[String]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };

        Ok(Self {
            include: lowered(&settings.include),
            exclude: lowered(&settings.exclude),
            accepted_regions: region_list(&settings.accepted_regions),
            rejected_regions: region_list(&settings.rejected_regions),
            state_suffix: Regex::new(r",\s*([A-Z]{2})\b")?,
        })
    }

    pub fn evaluate(&self, record: &ListingRecord) -> Decision {
        let title = record.title.to_lowercase();
        if !self.include.iter().any(|phrase| title.contains(phrase.as_str())) {
            return Decision::Reject(RejectReason::NoKeywordMatch);
        }

        let text = format!(
            "{} {}",
            title,
            record.summary.as_deref().unwrap_or_default().to_lowercase()
        );
        if self.exclude.iter().any(|phrase| text.contains(phrase.as_str())) {
            return Decision::Reject(RejectReason::ExcludedKeyword);
        }

        if record.location_kind == LocationKind::Remote && !self.remote_region_accepted(&record.location) {
            return Decision::Reject(RejectReason::RemoteOutOfRegion);
        }

        Decision::Accept
    }

    /// Partition criteria first, then the keyword rules.
    pub fn evaluate_for(&self, partition: &SearchPartition, record: &ListingRecord) -> Decision {
        if partition.remote_only && record.location_kind != LocationKind::Remote {
            return Decision::Reject(RejectReason::OutsidePartition);
        }
        self.evaluate(record)
    }

    /// A remote location is out of region only when it names a place outside
    /// the accepted set. Metro areas and unrecognized text pass.
    fn remote_region_accepted(&self, location: &str) -> bool {
        let residual = region_words(location);
        if residual.is_empty() {
            return true;
        }

        let padded = format!(" {} ", residual);
        let names = |regions: &[String]| {
            regions
                .iter()
                .any(|region| padded.contains(&format!(" {} ", region)))
        };
        if names(&self.accepted_regions) {
            return true;
        }

        // "Austin, TX (Remote)" names a US state, "Toronto, ON" a province
        let codes: Vec<&str> = self
            .state_suffix
            .captures_iter(location)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if codes.iter().any(|code| US_STATE_CODES.contains(code))
            && self.accepted_regions.iter().any(|r| r == "united states")
        {
            return true;
        }
        if codes.iter().any(|code| CA_PROVINCE_CODES.contains(code)) {
            return false;
        }

        !names(&self.rejected_regions)
    }
}

fn region_list(regions: &[String]) -> Vec<String> {
    regions
        .iter()
        .map(|r| region_words(r))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Lowercased words with punctuation and the word "remote" removed.
fn region_words(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && *word != "remote")
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> RelevanceFilter {
        RelevanceFilter::new(&FilterSettings::default()).unwrap()
    }

    fn record(title: &str, location: &str) -> ListingRecord {
        ListingRecord {
            title: title.to_string(),
            organization: "Acme".to_string(),
            location: location.to_string(),
            location_kind: LocationKind::classify(location, None),
            compensation_min: None,
            compensation_max: None,
            compensation_text: None,
            posted_age_text: "1 hour ago".to_string(),
            external_id: None,
            detail_url: "https://www.linkedin.com/jobs/view/1234567".to_string(),
            organization_career_url: None,
            summary: None,
        }
    }

    #[test]
    fn test_accepts_matching_title() {
        assert_eq!(filter().evaluate(&record("Associate Product Manager", "New York, NY")), Decision::Accept);
        assert_eq!(filter().evaluate(&record("SENIOR PRODUCT MANAGER", "Los Angeles, CA")), Decision::Accept);
    }

    #[test]
    fn test_rejects_without_inclusion_phrase() {
        assert_eq!(
            filter().evaluate(&record("Software Engineer", "New York, NY")),
            Decision::Reject(RejectReason::NoKeywordMatch)
        );
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let decision = filter().evaluate(&record("Clinical Research Associate Product Manager", "New York, NY"));
        assert_eq!(decision, Decision::Reject(RejectReason::ExcludedKeyword));
        assert!(!decision.is_relevant());
    }

    #[test]
    fn test_exclusion_applies_to_summary() {
        let mut listing = record("Product Manager", "New York, NY");
        listing.summary = Some("Join our hospital network's digital team".to_string());
        assert_eq!(filter().evaluate(&listing), Decision::Reject(RejectReason::ExcludedKeyword));
    }

    #[test]
    fn test_remote_region_rules() {
        let filter = filter();
        assert_eq!(filter.evaluate(&record("Product Manager", "United States (Remote)")), Decision::Accept);
        assert_eq!(filter.evaluate(&record("Product Manager", "Remote")), Decision::Accept);
        assert_eq!(filter.evaluate(&record("Product Manager", "Austin, TX (Remote)")), Decision::Accept);
        assert_eq!(filter.evaluate(&record("Product Manager", "Remote - US")), Decision::Accept);
        assert_eq!(
            filter.evaluate(&record("Product Manager", "Canada (Remote)")),
            Decision::Reject(RejectReason::RemoteOutOfRegion)
        );
        assert_eq!(
            filter.evaluate(&record("Product Manager", "Toronto, ON (Remote)")),
            Decision::Reject(RejectReason::RemoteOutOfRegion)
        );
        // region rules only apply to remote listings
        assert_eq!(filter.evaluate(&record("Product Manager", "London, England")), Decision::Accept);
    }

    #[test]
    fn test_remote_us_metro_areas_are_accepted() {
        let filter = filter();
        let mut listing = record("Product Manager", "New York City Metropolitan Area");
        listing.summary = Some("This role is remote-friendly".to_string());
        listing.location_kind = LocationKind::classify(&listing.location, listing.summary.as_deref());
        assert_eq!(listing.location_kind, LocationKind::Remote);
        assert_eq!(filter.evaluate(&listing), Decision::Accept);

        for location in [
            "San Francisco Bay Area (Remote)",
            "Greater Chicago Area (Remote)",
            "Los Angeles Metropolitan Area (Remote)",
        ] {
            assert_eq!(filter.evaluate(&record("Product Manager", location)), Decision::Accept, "{location}");
        }
    }

    #[test]
    fn test_named_foreign_regions_are_rejected() {
        let filter = filter();
        for location in ["London, England (Remote)", "EMEA (Remote)", "Vancouver, BC (Remote)", "Latin America (Remote)"] {
            assert_eq!(
                filter.evaluate(&record("Product Manager", location)),
                Decision::Reject(RejectReason::RemoteOutOfRegion),
                "{location}"
            );
        }
    }

    #[test]
    fn test_rejected_regions_are_configurable() {
        let settings = FilterSettings {
            rejected_regions: vec!["Greater Chicago Area".to_string()],
            ..FilterSettings::default()
        };
        let filter = RelevanceFilter::new(&settings).unwrap();
        assert_eq!(
            filter.evaluate(&record("Product Manager", "Greater Chicago Area (Remote)")),
            Decision::Reject(RejectReason::RemoteOutOfRegion)
        );
        // no longer in the list
        assert_eq!(filter.evaluate(&record("Product Manager", "Canada (Remote)")), Decision::Accept);
    }

    #[test]
    fn test_remote_only_partition() {
        let partition = SearchPartition {
            name: "Remote".to_string(),
            location_id: "90000072".to_string(),
            channel: None,
            remote_only: true,
        };
        let filter = filter();
        assert_eq!(
            filter.evaluate_for(&partition, &record("Product Manager", "New York, NY")),
            Decision::Reject(RejectReason::OutsidePartition)
        );
        assert_eq!(
            filter.evaluate_for(&partition, &record("Product Manager", "United States (Remote)")),
            Decision::Accept
        );
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let filter = filter();
        let listings = [
            record("Associate Product Manager", "New York, NY"),
            record("Clinical Product Manager", "Remote"),
            record("Engineer", "Remote"),
            record("Product Manager", "Canada (Remote)"),
        ];
        for listing in &listings {
            let first = filter.evaluate(listing);
            for _ in 0..10 {
                assert_eq!(filter.evaluate(listing), first);
            }
        }
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RejectReason::ExcludedKeyword.to_string(), "excluded_keyword");
        assert_eq!(RejectReason::NoKeywordMatch.to_string(), "no_keyword_match");
    }
}
