use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::SearchPartition;

pub const DEFAULT_CONFIG_FILE: &str = "jobwatch.toml";

/// Webhook embeds per message are capped at 10 upstream.
pub const MAX_ITEMS_PER_MESSAGE_LIMIT: usize = 10;

/// Everything a run needs, loaded once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: Option<PathBuf>,
    /// JSON object mapping organization name to careers URL.
    pub careers_file: Option<PathBuf>,
    pub search: SearchSettings,
    pub partitions: Vec<SearchPartition>,
    pub filter: FilterSettings,
    pub fetch: FetchSettings,
    pub delivery: DeliverySettings,
    pub run: RunSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub base_url: String,
    pub keywords: String,
    /// Recency window passed upstream as `f_TPR=r<seconds>`.
    pub posted_within_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub accepted_regions: Vec<String>,
    /// Places that mark a remote listing as out of region.
    pub rejected_regions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub default_channel: Option<String>,
    pub max_items_per_message: usize,
    pub attempts: u32,
    pub retry_delay_ms: u64,
    /// Pause between consecutive messages to the same channel.
    pub message_delay_ms: u64,
    pub timeout_secs: u64,
    /// Post the run summary to the default channel when a run finishes.
    pub post_summary: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub max_duration_secs: u64,
    pub partition_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            careers_file: None,
            search: SearchSettings::default(),
            partitions: default_partitions(),
            filter: FilterSettings::default(),
            fetch: FetchSettings::default(),
            delivery: DeliverySettings::default(),
            run: RunSettings::default(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.linkedin.com/jobs/search/".to_string(),
            keywords: "associate product manager".to_string(),
            posted_within_minutes: 30,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            include: to_strings(&[
                "product manager",
                "associate product manager",
                "sr. product manager",
                "senior product manager",
                "principal product manager",
                "staff product manager",
                "product operations",
                "product ops",
                "apm",
                "spm",
            ]),
            exclude: to_strings(&[
                "clinical",
                "medical",
                "healthcare",
                "hospital",
                "patient",
                "nursing",
                "therapy",
                "pharmaceutical",
                "education",
                "academic",
                "school",
                "teaching",
                "instructor",
                "curriculum",
                "construction",
                "real estate",
                "property management",
                "facility",
                "maintenance",
                "janitorial",
                "security guard",
                "warehouse",
                "logistics coordinator",
                "driver",
                "delivery",
                "food service",
                "restaurant",
                "retail",
                "sales associate",
                "customer service rep",
            ]),
            accepted_regions: to_strings(&["united states", "usa", "us", "u.s."]),
            rejected_regions: to_strings(&[
                "canada",
                "toronto",
                "vancouver",
                "montreal",
                "ontario",
                "quebec",
                "british columbia",
                "alberta",
                "mexico",
                "latin america",
                "latam",
                "brazil",
                "argentina",
                "colombia",
                "united kingdom",
                "uk",
                "england",
                "london",
                "ireland",
                "europe",
                "emea",
                "germany",
                "berlin",
                "france",
                "paris",
                "spain",
                "netherlands",
                "amsterdam",
                "poland",
                "portugal",
                "india",
                "bengaluru",
                "apac",
                "singapore",
                "philippines",
                "japan",
                "china",
                "australia",
                "israel",
            ]),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            attempts: 2,
            retry_delay_ms: 2_000,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            default_channel: None,
            max_items_per_message: MAX_ITEMS_PER_MESSAGE_LIMIT,
            attempts: 3,
            retry_delay_ms: 2_000,
            message_delay_ms: 2_000,
            timeout_secs: 30,
            post_summary: false,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: 900,
            partition_delay_ms: 2_000,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl DeliverySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }
}

impl RunSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn partition_delay(&self) -> Duration {
        Duration::from_millis(self.partition_delay_ms)
    }
}

fn default_partitions() -> Vec<SearchPartition> {
    [
        ("NYC", "90000070", false),
        ("LA", "90000049", false),
        ("SF", "90000084", false),
        ("SD", "90010472", false),
        ("Remote", "90000072", true),
    ]
    .iter()
    .map(|(name, location_id, remote_only)| SearchPartition {
        name: name.to_string(),
        location_id: location_id.to_string(),
        channel: None,
        remote_only: *remote_only,
    })
    .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path, else `jobwatch.toml` in the working directory, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions.is_empty() {
            return Err(ConfigError::Invalid("at least one partition is required".into()));
        }

        let mut names = HashSet::new();
        for partition in &self.partitions {
            if partition.name.trim().is_empty() || partition.location_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "partitions need a name and a location_id".into(),
                ));
            }
            if !names.insert(partition.name.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate partition '{}'",
                    partition.name
                )));
            }
        }

        if self.filter.include.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid("filter.include must not be empty".into()));
        }

        let max_items = self.delivery.max_items_per_message;
        if max_items == 0 || max_items > MAX_ITEMS_PER_MESSAGE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "delivery.max_items_per_message must be between 1 and {}, got {}",
                MAX_ITEMS_PER_MESSAGE_LIMIT, max_items
            )));
        }

        if self.fetch.attempts == 0 || self.delivery.attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1".into()));
        }

        if self.fetch.timeout_secs == 0 || self.run.max_duration_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }

        Ok(())
    }

    /// Delivery needs somewhere to send every partition's messages.
    pub fn ensure_deliverable(&self) -> Result<(), ConfigError> {
        if self.delivery.default_channel.is_some() {
            return Ok(());
        }
        let missing: Vec<&str> = self
            .partitions
            .iter()
            .filter(|p| p.channel.is_none())
            .map(|p| p.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "no channel for partition(s) {} and no delivery.default_channel",
                missing.join(", ")
            )))
        }
    }

    pub fn partition(&self, name: &str) -> Option<&SearchPartition> {
        self.partitions
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn channel_for<'a>(&'a self, partition: &'a SearchPartition) -> Option<&'a str> {
        partition
            .channel
            .as_deref()
            .or(self.delivery.default_channel.as_deref())
    }
}
