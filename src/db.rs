use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{ListingRecord, SearchLog, SeenRecord, SeenStatus, StoreStats};

/// Persisted "have we processed this posting" state.
pub trait SeenStore {
    /// Atomically inserts `fingerprint` as unseen-until-now, or refreshes its
    /// `last_seen`. Only the first call for a fingerprint returns `New`.
    /// `origin` (partition, record) is kept for display on first insert.
    fn check_and_mark_at(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        origin: Option<(&str, &ListingRecord)>,
    ) -> Result<SeenStatus, StoreError>;

    fn mark_notified(&self, fingerprint: &str) -> Result<(), StoreError>;

    fn contains(&self, fingerprint: &str) -> Result<bool, StoreError>;

    fn record_search(&self, log: &SearchLog) -> Result<(), StoreError>;

    fn check_and_mark(&self, fingerprint: &str) -> Result<SeenStatus, StoreError> {
        self.check_and_mark_at(fingerprint, Utc::now(), None)
    }
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        // a second process may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn, path })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobwatch") {
            proj_dirs.data_dir().join("jobwatch.db")
        } else {
            PathBuf::from("jobwatch.db")
        }
    }

    pub fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS seen_listings (
                fingerprint TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                notified INTEGER NOT NULL DEFAULT 0,
                partition TEXT,
                title TEXT,
                organization TEXT,
                location TEXT,
                detail_url TEXT
            );

            CREATE TABLE IF NOT EXISTS search_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partition TEXT NOT NULL,
                search_url TEXT NOT NULL,
                records_found INTEGER NOT NULL DEFAULT 0,
                records_new INTEGER NOT NULL DEFAULT 0,
                success INTEGER NOT NULL DEFAULT 1,
                error_message TEXT,
                searched_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_seen_last_seen ON seen_listings(last_seen);
            CREATE INDEX IF NOT EXISTS idx_seen_notified ON seen_listings(notified);
            CREATE INDEX IF NOT EXISTS idx_search_history_at ON search_history(searched_at);
            "#,
        )?;
        Ok(())
    }

    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='seen_listings'",
            [],
            |row| row.get(0),
        )?;
        Ok(tables > 0)
    }

    #[cfg(test)]
    pub fn get(&self, fingerprint: &str) -> Result<Option<SeenRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT fingerprint, first_seen, last_seen, notified, partition, title,
                        organization, location, detail_url
                 FROM seen_listings WHERE fingerprint = ?1",
                [fingerprint],
                Self::row_to_seen,
            )
            .optional()?;
        Ok(record)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<SeenRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, first_seen, last_seen, notified, partition, title,
                    organization, location, detail_url
             FROM seen_listings
             ORDER BY first_seen DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_seen)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats, StoreError> {
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let count = |sql: &str, since: Option<DateTime<Utc>>| -> Result<i64, StoreError> {
            let n = match since {
                Some(t) => self.conn.query_row(sql, [t], |row| row.get(0))?,
                None => self.conn.query_row(sql, [], |row| row.get(0))?,
            };
            Ok(n)
        };

        Ok(StoreStats {
            total_seen: count("SELECT COUNT(*) FROM seen_listings", None)?,
            seen_today: count(
                "SELECT COUNT(*) FROM seen_listings WHERE first_seen >= ?1",
                Some(start_of_day),
            )?,
            unnotified: count("SELECT COUNT(*) FROM seen_listings WHERE notified = 0", None)?,
            total_searches: count("SELECT COUNT(*) FROM search_history", None)?,
            failed_searches_today: count(
                "SELECT COUNT(*) FROM search_history WHERE success = 0 AND searched_at >= ?1",
                Some(start_of_day),
            )?,
        })
    }

    /// Deletes seen entries not encountered since `cutoff`, and older search logs.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM seen_listings WHERE last_seen < ?1", [cutoff])?;
        tx.execute("DELETE FROM search_history WHERE searched_at < ?1", [cutoff])?;
        tx.commit()?;
        Ok(removed)
    }

    fn row_to_seen(row: &rusqlite::Row) -> rusqlite::Result<SeenRecord> {
        Ok(SeenRecord {
            fingerprint: row.get(0)?,
            first_seen: row.get(1)?,
            last_seen: row.get(2)?,
            notified: row.get(3)?,
            partition: row.get(4)?,
            title: row.get(5)?,
            organization: row.get(6)?,
            location: row.get(7)?,
            detail_url: row.get(8)?,
        })
    }
}

impl SeenStore for Database {
    fn check_and_mark_at(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        origin: Option<(&str, &ListingRecord)>,
    ) -> Result<SeenStatus, StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        // the primary key makes the insert the single point of decision
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO seen_listings
                (fingerprint, first_seen, last_seen, notified, partition, title, organization, location, detail_url)
             VALUES (?1, ?2, ?2, 0, ?3, ?4, ?5, ?6, ?7)",
            params![
                fingerprint,
                now,
                origin.map(|(partition, _)| partition),
                origin.map(|(_, r)| r.title.as_str()),
                origin.map(|(_, r)| r.organization.as_str()),
                origin.map(|(_, r)| r.location.as_str()),
                origin.map(|(_, r)| r.detail_url.as_str()),
            ],
        )?;

        let status = if inserted == 1 {
            SeenStatus::New
        } else {
            tx.execute(
                "UPDATE seen_listings SET last_seen = ?1 WHERE fingerprint = ?2",
                params![now, fingerprint],
            )?;
            SeenStatus::Duplicate
        };

        tx.commit()?;
        Ok(status)
    }

    fn mark_notified(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE seen_listings SET notified = 1 WHERE fingerprint = ?1",
            [fingerprint],
        )?;
        Ok(())
    }

    fn contains(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM seen_listings WHERE fingerprint = ?1",
                [fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_search(&self, log: &SearchLog) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO search_history
                (partition, search_url, records_found, records_new, success, error_message, searched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                log.partition,
                log.search_url,
                log.records_found as i64,
                log.records_new as i64,
                log.success,
                log.error_message,
                Utc::now(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn store() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_only_first_check_is_new() {
        let db = store();
        assert_eq!(db.check_and_mark("abc").unwrap(), SeenStatus::New);
        for _ in 0..5 {
            assert_eq!(db.check_and_mark("abc").unwrap(), SeenStatus::Duplicate);
        }
    }

    #[test]
    fn test_interleaved_fingerprints() {
        let db = store();
        let sequence = ["a", "b", "a", "c", "b", "a", "d", "c"];
        let mut seen = std::collections::HashSet::new();
        for fp in sequence {
            let expected = if seen.insert(fp) {
                SeenStatus::New
            } else {
                SeenStatus::Duplicate
            };
            assert_eq!(db.check_and_mark(fp).unwrap(), expected, "fingerprint {}", fp);
        }
    }

    #[test]
    fn test_reappearance_updates_last_seen_only() {
        let db = store();
        let first_run = at(9, 0);
        let second_run = at(9, 30);

        assert_eq!(db.check_and_mark_at("fp", first_run, None).unwrap(), SeenStatus::New);
        db.mark_notified("fp").unwrap();
        assert_eq!(db.check_and_mark_at("fp", second_run, None).unwrap(), SeenStatus::Duplicate);

        let record = db.get("fp").unwrap().unwrap();
        assert_eq!(record.first_seen, first_run);
        assert_eq!(record.last_seen, second_run);
        assert!(record.notified);
    }

    #[test]
    fn test_new_records_start_unnotified_with_origin() {
        let db = store();
        let listing = ListingRecord {
            title: "Product Manager".to_string(),
            organization: "Acme".to_string(),
            location: "New York, NY".to_string(),
            location_kind: crate::models::LocationKind::OnSite,
            compensation_min: None,
            compensation_max: None,
            compensation_text: None,
            posted_age_text: "1 hour ago".to_string(),
            external_id: None,
            detail_url: "https://www.linkedin.com/jobs/view/1234567".to_string(),
            organization_career_url: None,
            summary: None,
        };
        let fp = listing.fingerprint();
        db.check_and_mark_at(&fp, at(10, 0), Some(("NYC", &listing))).unwrap();

        let record = db.get(&fp).unwrap().unwrap();
        assert!(!record.notified);
        assert_eq!(record.first_seen, record.last_seen);
        assert_eq!(record.partition.as_deref(), Some("NYC"));
        assert_eq!(record.organization.as_deref(), Some("Acme"));
        assert!(db.contains(&fp).unwrap());
        assert!(!db.contains("missing").unwrap());
    }

    #[test]
    fn test_stats_and_search_log() {
        let db = store();
        let now = Utc::now();
        db.check_and_mark_at("one", now, None).unwrap();
        db.check_and_mark_at("two", now - ChronoDuration::days(3), None).unwrap();
        db.mark_notified("one").unwrap();
        db.record_search(&SearchLog {
            partition: "NYC".to_string(),
            search_url: "https://example.com".to_string(),
            records_found: 4,
            records_new: 1,
            success: true,
            error_message: None,
        })
        .unwrap();
        db.record_search(&SearchLog {
            partition: "LA".to_string(),
            search_url: "https://example.com".to_string(),
            records_found: 0,
            records_new: 0,
            success: false,
            error_message: Some("HTTP 429".to_string()),
        })
        .unwrap();

        let stats = db.stats(now).unwrap();
        assert_eq!(stats.total_seen, 2);
        assert_eq!(stats.seen_today, 1);
        assert_eq!(stats.unnotified, 1);
        assert_eq!(stats.total_searches, 2);
        assert_eq!(stats.failed_searches_today, 1);
    }

    #[test]
    fn test_prune_removes_stale_entries() {
        let db = store();
        db.check_and_mark_at("old", at(1, 0) - ChronoDuration::days(10), None).unwrap();
        db.check_and_mark_at("fresh", at(1, 0), None).unwrap();
        let removed = db.prune(at(0, 0) - ChronoDuration::days(7)).unwrap();
        assert_eq!(removed, 1);
        assert!(!db.contains("old").unwrap());
        assert!(db.contains("fresh").unwrap());
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let db = store();
        db.check_and_mark_at("early", at(8, 0), None).unwrap();
        db.check_and_mark_at("late", at(12, 0), None).unwrap();
        let recent = db.recent(10).unwrap();
        let fps: Vec<&str> = recent.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(fps, vec!["late", "early"]);
        assert_eq!(db.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_uninitialized_store_is_unavailable() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_initialized().unwrap());
        assert!(matches!(db.check_and_mark("x"), Err(StoreError::Unavailable(_))));
        db.init().unwrap();
        assert!(db.is_initialized().unwrap());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("jobwatch.db");
        let db = Database::open(Some(&path)).unwrap();
        db.init().unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), &path);
    }
}
