use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

const CORPORATE_SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corporation", "corp", "co", "company"];

/// Organization name -> careers page, read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct CareerDirectory {
    entries: HashMap<String, String>,
}

impl CareerDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, url)| (canonical_name(name.as_ref()), url.into()))
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self { entries }
    }

    /// Reads a JSON object of `{ "Organization": "https://..." }`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let map: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self::from_entries(map))
    }

    pub fn lookup(&self, organization: &str) -> Option<&str> {
        self.entries
            .get(&canonical_name(organization))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// "Acme, Inc." and "acme" resolve to the same key.
fn canonical_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() > 1 && CORPORATE_SUFFIXES.contains(words.last().unwrap_or(&"")) {
        words.pop();
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lookup_ignores_case_and_suffixes() {
        let directory = CareerDirectory::from_entries([
            ("Acme Corp", "https://acme.example/careers"),
            ("Globex, Inc.", "https://globex.example/jobs"),
        ]);
        assert_eq!(directory.lookup("acme"), Some("https://acme.example/careers"));
        assert_eq!(directory.lookup("ACME CORPORATION"), Some("https://acme.example/careers"));
        assert_eq!(directory.lookup("Globex Inc"), Some("https://globex.example/jobs"));
        assert_eq!(directory.lookup("  globex  "), Some("https://globex.example/jobs"));
    }

    #[test]
    fn test_missing_organization_is_none() {
        let directory = CareerDirectory::from_entries([("Acme", "https://acme.example/careers")]);
        assert_eq!(directory.lookup("Initech"), None);
        assert_eq!(CareerDirectory::empty().lookup("Acme"), None);
    }

    #[test]
    fn test_suffix_only_names_are_kept() {
        // "Company" alone is a name, not a suffix to strip
        assert_eq!(canonical_name("Company"), "company");
        assert_eq!(canonical_name("The Company Co."), "the company");
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Stripe": "https://stripe.com/jobs", "Figma, Inc.": "https://figma.com/careers"}}"#).unwrap();
        let directory = CareerDirectory::load(file.path()).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.lookup("figma"), Some("https://figma.com/careers"));
    }
}
