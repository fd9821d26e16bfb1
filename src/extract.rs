use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::careers::CareerDirectory;
use crate::models::{ListingRecord, LocationKind, SearchPartition};

/// Records parsed from one document, plus how many cards had to be skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<ListingRecord>,
    pub failures: usize,
}

impl Extraction {
    pub fn cards_seen(&self) -> usize {
        self.records.len() + self.failures
    }

    /// Cards were present but every one of them was malformed.
    pub fn is_total_failure(&self) -> bool {
        self.records.is_empty() && self.failures > 0
    }
}

struct CardSelectors {
    card: Selector,
    title: Selector,
    organization: Selector,
    location: Selector,
    link: Selector,
    salary: Selector,
    snippet: Selector,
    posted: Selector,
}

impl CardSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            card: selector("div.job-search-card, div.base-card")?,
            title: selector("h3.base-search-card__title")?,
            organization: selector("h4.base-search-card__subtitle")?,
            location: selector("span.job-search-card__location")?,
            link: selector("a.base-card__full-link")?,
            salary: selector("span.job-search-card__salary-info")?,
            snippet: selector(".job-search-card__snippet")?,
            posted: selector("time")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

/// Turns search-result markup into listing records. Holds only compiled
/// selectors, patterns and the read-only career directory, so extraction is
/// a pure function of the document.
pub struct Extractor {
    selectors: CardSelectors,
    range: Regex,
    currency_range: Regex,
    trailing_id: Regex,
    careers: CareerDirectory,
}

impl Extractor {
    pub fn new(careers: CareerDirectory) -> Result<Self> {
        // "$120K - $150K", "$120,000.00/yr - $150,000.00/yr", "90 to 110k"
        let amount = r"(\d[\d,]*(?:\.\d+)?)\s*([kKmM]\b)?(?:\s*/\s*[a-zA-Z]+)?";
        let range = Regex::new(&format!(
            r"[$€£]?\s*{amount}\s*(?:-|–|—|\bto\b)\s*[$€£]?\s*{amount}"
        ))?;
        let currency_range = Regex::new(
            r"[$€£]\s*\d[\d,]*(?:\.\d+)?\s*(?:[kKmM]\b)?(?:\s*/\s*[a-zA-Z]+)?\s*(?:-|–|—|\bto\b)\s*[$€£]?\s*\d[\d,]*(?:\.\d+)?\s*(?:[kKmM]\b)?(?:\s*/\s*[a-zA-Z]+)?",
        )?;
        let trailing_id = Regex::new(r"(\d{6,})/?$")?;

        Ok(Self {
            selectors: CardSelectors::new()?,
            range,
            currency_range,
            trailing_id,
            careers,
        })
    }

    pub fn careers(&self) -> &CareerDirectory {
        &self.careers
    }

    pub fn extract(&self, document: &str, partition: &SearchPartition) -> Extraction {
        let document = Html::parse_document(document);
        let mut extraction = Extraction::default();

        for (i, card) in document.select(&self.selectors.card).enumerate() {
            match self.parse_card(card) {
                Some(record) => extraction.records.push(record),
                None => {
                    extraction.failures += 1;
                    debug!(partition = %partition.name, card = i + 1, "Skipping card without title or organization");
                }
            }
        }

        info!(
            partition = %partition.name,
            records = extraction.records.len(),
            failures = extraction.failures,
            "Extracted {} listings",
            extraction.records.len()
        );
        extraction
    }

    fn parse_card(&self, card: ElementRef) -> Option<ListingRecord> {
        let title = text_of(card, &self.selectors.title)?;
        let organization = text_of(card, &self.selectors.organization)?;
        let location = text_of(card, &self.selectors.location).unwrap_or_default();
        let summary = text_of(card, &self.selectors.snippet);
        let posted_age_text = text_of(card, &self.selectors.posted).unwrap_or_default();

        let href = card
            .select(&self.selectors.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or("");
        let detail_url = clean_tracking_url(href).unwrap_or_default();

        let external_id = card
            .value()
            .attr("data-entity-urn")
            .and_then(job_id_from_urn)
            .or_else(|| self.job_id_from_url(&detail_url));

        let compensation_text = text_of(card, &self.selectors.salary).or_else(|| {
            summary
                .as_deref()
                .and_then(|s| self.currency_range.find(s))
                .map(|m| m.as_str().trim().to_string())
        });
        let (compensation_min, compensation_max) = compensation_text
            .as_deref()
            .and_then(|text| self.parse_compensation(text))
            .map_or((None, None), |(min, max)| (Some(min), Some(max)));

        let location_kind = LocationKind::classify(&location, summary.as_deref());
        let organization_career_url = self.careers.lookup(&organization).map(String::from);

        Some(ListingRecord {
            title,
            organization,
            location,
            location_kind,
            compensation_min,
            compensation_max,
            compensation_text,
            posted_age_text,
            external_id,
            detail_url,
            organization_career_url,
            summary,
        })
    }

    /// Parses the first "<number> - <number>" range into base currency units.
    pub fn parse_compensation(&self, text: &str) -> Option<(i64, i64)> {
        let caps = self.range.captures(text)?;
        let low_suffix = caps.get(2).map(|m| m.as_str());
        let high_suffix = caps.get(4).map(|m| m.as_str());

        // "120-150K": a suffix carries over only to a short bare number
        let low = parse_amount(&caps[1], low_suffix.or(borrowed_suffix(&caps[1], high_suffix)))?;
        let high = parse_amount(&caps[3], high_suffix.or(borrowed_suffix(&caps[3], low_suffix)))?;

        if low <= 0 || high <= 0 {
            return None;
        }
        if low > high {
            Some((high, low))
        } else {
            Some((low, high))
        }
    }

    fn job_id_from_url(&self, url: &str) -> Option<String> {
        self.trailing_id
            .captures(url)
            .map(|caps| caps[1].to_string())
    }
}

fn borrowed_suffix<'a>(digits: &str, suffix: Option<&'a str>) -> Option<&'a str> {
    if digits.contains(',') {
        return None;
    }
    let value: f64 = digits.parse().ok()?;
    if value < 1_000.0 { suffix } else { None }
}

fn parse_amount(digits: &str, suffix: Option<&str>) -> Option<i64> {
    let value: f64 = digits.replace(',', "").parse().ok()?;
    let multiplier = match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        _ => 1.0,
    };
    Some((value * multiplier).round() as i64)
}

/// Whitespace-collapsed text of the first match; `None` when missing or blank.
fn text_of(card: ElementRef, selector: &Selector) -> Option<String> {
    let element = card.select(selector).next()?;
    let text = element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() { None } else { Some(text) }
}

fn job_id_from_urn(urn: &str) -> Option<String> {
    urn.rsplit(':')
        .next()
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
}

/// Search pages wrap links in tracking parameters; keep scheme, host and path.
pub fn clean_tracking_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    Some(url[..end].to_string())
}
