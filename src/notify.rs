use serde::Serialize;

use crate::models::{ListingRecord, LocationKind};
use crate::runner::{PartitionStatus, RunSummary};

const TITLE_MAX: usize = 200;
const ORGANIZATION_MAX: usize = 100;
const FIELD_MAX: usize = 200;
/// Webhook limit for one field value.
const FIELD_VALUE_MAX: usize = 1024;
/// Two labelled links must fit one field value.
const LINK_MAX: usize = 480;
const FOOTER: &str = "jobwatch";

const COLOR_DEFAULT: u32 = 0x0077B5;
const COLOR_HIGH_PAY: u32 = 0xFFD700;
const COLOR_REMOTE: u32 = 0x00FFFF;
const COLOR_OK: u32 = 0x2ECC71;
const COLOR_WARN: u32 = 0xE67E22;

/// Pay floor that earns the highlighted embed color.
const HIGH_PAY_MIN: i64 = 150_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
}

/// One webhook payload. Serializes to `{content, embeds}`; the partition and
/// covered fingerprints stay local.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    #[serde(skip)]
    pub partition: String,
    pub content: String,
    pub embeds: Vec<Embed>,
    #[serde(skip)]
    pub fingerprints: Vec<String>,
}

/// Groups (partition, record) pairs by partition in first-appearance order and
/// splits each group into messages of at most `max_items` records.
pub fn format_messages<'a, I>(items: I, max_items: usize) -> Vec<OutboundMessage>
where
    I: IntoIterator<Item = (&'a str, &'a ListingRecord)>,
{
    let max_items = max_items.max(1);
    let mut groups: Vec<(&str, Vec<&ListingRecord>)> = Vec::new();
    for (partition, record) in items {
        match groups.iter_mut().find(|(name, _)| *name == partition) {
            Some((_, records)) => records.push(record),
            None => groups.push((partition, vec![record])),
        }
    }

    let mut messages = Vec::new();
    for (partition, records) in groups {
        let batches: Vec<&[&ListingRecord]> = records.chunks(max_items).collect();
        let total = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let mut content = format!(
                "**{} new {} in {}**",
                batch.len(),
                if batch.len() == 1 { "listing" } else { "listings" },
                sanitize(partition, FIELD_MAX)
            );
            if total > 1 {
                content.push_str(&format!(" (batch {}/{})", i + 1, total));
            }

            messages.push(OutboundMessage {
                partition: partition.to_string(),
                content,
                embeds: batch.iter().map(|r| listing_embed(r)).collect(),
                fingerprints: batch.iter().map(|r| r.fingerprint()).collect(),
            });
        }
    }
    messages
}

fn listing_embed(record: &ListingRecord) -> Embed {
    let color = if record.compensation_min.is_some_and(|min| min >= HIGH_PAY_MIN) {
        COLOR_HIGH_PAY
    } else if record.location_kind == LocationKind::Remote {
        COLOR_REMOTE
    } else {
        COLOR_DEFAULT
    };

    let mut fields = vec![
        field("Compensation", compensation_display(record), true),
        field("Location", location_display(record), true),
        field("Posted", non_empty(sanitize(&record.posted_age_text, FIELD_MAX), "Recently"), true),
    ];

    let mut links = Vec::new();
    if let Some(url) = safe_url(&record.detail_url) {
        links.push(format!("[View listing]({})", url));
    }
    if let Some(url) = record.organization_career_url.as_deref().and_then(safe_url) {
        links.push(format!("[Careers page]({})", url));
    }
    let links = links.join(" | ");
    if !links.is_empty() && links.len() <= FIELD_VALUE_MAX {
        fields.push(field("Links", links, false));
    }

    if let Some(id) = &record.external_id {
        fields.push(field("Job ID", sanitize(id, 40), true));
    }

    Embed {
        title: non_empty(sanitize(&record.title, TITLE_MAX), "Untitled position"),
        url: safe_url(&record.detail_url),
        description: Some(format!("**{}**", sanitize(&record.organization, ORGANIZATION_MAX))),
        color,
        fields,
        footer: EmbedFooter { text: FOOTER.to_string() },
    }
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline,
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.is_empty() { fallback.to_string() } else { value }
}

pub fn compensation_display(record: &ListingRecord) -> String {
    match (record.compensation_min, record.compensation_max) {
        (Some(min), Some(max)) => format!("{} - {}", dollars(min), dollars(max)),
        (Some(min), None) => format!("{}+", dollars(min)),
        (None, Some(max)) => format!("Up to {}", dollars(max)),
        (None, None) => record
            .compensation_text
            .as_deref()
            .map(|text| sanitize(text, FIELD_MAX))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "Not specified".to_string()),
    }
}

pub fn location_display(record: &ListingRecord) -> String {
    let location = sanitize(&record.location, FIELD_MAX);
    if record.location_kind == LocationKind::Unknown {
        return non_empty(location, "Not specified");
    }

    let label = record.location_kind.label();
    if location.is_empty() {
        label.to_string()
    } else if location.to_lowercase().contains(&label.to_lowercase()) {
        location
    } else {
        format!("{} ({})", location, label)
    }
}

/// `120000` -> `$120,000`
fn dollars(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if amount < 0 { format!("-${}", grouped) } else { format!("${}", grouped) }
}

/// Strips control characters, collapses whitespace, escapes markdown and caps
/// the result at `max` characters (ellipsis included).
pub fn sanitize(text: &str, max: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let units: Vec<String> = collapsed.chars().map(escape_char).collect();
    let full_len: usize = units.iter().map(|u| u.chars().count()).sum();
    if full_len <= max {
        return units.concat();
    }

    // never split an escape sequence
    let budget = max.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for unit in &units {
        let len = unit.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(unit);
        used += len;
    }
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

fn escape_char(c: char) -> String {
    match c {
        '\\' | '`' | '*' | '_' | '~' | '|' | '>' | '<' | '#' | '[' | ']' => format!("\\{}", c),
        _ => c.to_string(),
    }
}

/// Links only go out as http(s), no longer than `LINK_MAX`, and with characters
/// that would end a markdown link encoded.
fn safe_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return None;
    }
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars().filter(|c| !c.is_control()) {
        match c {
            ' ' => out.push_str("%20"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            _ => out.push(c),
        }
    }
    if out.len() > LINK_MAX {
        return None;
    }
    Some(out)
}

/// Status message for the default channel after a run.
pub fn summary_message(summary: &RunSummary) -> OutboundMessage {
    let healthy = summary.failed() == 0 && summary.skipped() == 0;
    let mut fields = vec![
        field(
            "Partitions",
            format!(
                "{} attempted, {} succeeded, {} failed, {} skipped",
                summary.attempted(),
                summary.succeeded(),
                summary.failed(),
                summary.skipped()
            ),
            false,
        ),
        field("Found", summary.records_found().to_string(), true),
        field("Relevant", summary.relevant().to_string(), true),
        field("New", summary.records_new().to_string(), true),
        field("Notified", summary.notified().to_string(), true),
        field(
            "Messages",
            format!("{} sent, {} failed", summary.messages_sent(), summary.messages_failed()),
            true,
        ),
    ];

    for report in &summary.partitions {
        if report.status == PartitionStatus::Succeeded {
            continue;
        }
        let reason = report.error.as_deref().unwrap_or("unknown error");
        fields.push(field(
            &sanitize(&report.partition, 100),
            sanitize(reason, FIELD_MAX),
            false,
        ));
    }

    OutboundMessage {
        partition: String::new(),
        content: if summary.dry_run {
            "**Run summary (dry run)**".to_string()
        } else {
            "**Run summary**".to_string()
        },
        embeds: vec![Embed {
            title: if healthy {
                "All partitions completed".to_string()
            } else {
                "Run finished with errors".to_string()
            },
            url: None,
            description: None,
            color: if healthy { COLOR_OK } else { COLOR_WARN },
            fields,
            footer: EmbedFooter { text: FOOTER.to_string() },
        }],
        fingerprints: Vec::new(),
    }
}

/// Fixed message used by `test-notify` to check a channel end to end.
pub fn test_message(partition: &str) -> OutboundMessage {
    OutboundMessage {
        partition: partition.to_string(),
        content: format!("**Test notification for {}**", sanitize(partition, FIELD_MAX)),
        embeds: vec![Embed {
            title: "Channel check".to_string(),
            url: None,
            description: Some("If you can read this, delivery works.".to_string()),
            color: COLOR_OK,
            fields: Vec::new(),
            footer: EmbedFooter { text: FOOTER.to_string() },
        }],
        fingerprints: Vec::new(),
    }
}
