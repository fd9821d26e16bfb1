use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::careers::CareerDirectory;
use crate::config::Config;
use crate::db::SeenStore;
use crate::delivery::{Deliver, Dispatcher};
use crate::error::RunError;
use crate::extract::Extractor;
use crate::fetch::{search_url, Fetch};
use crate::filter::{Decision, RelevanceFilter};
use crate::models::{ListingRecord, SearchLog, SearchPartition, SeenStatus};
use crate::notify::{format_messages, summary_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PartitionStatus {
    #[default]
    Succeeded,
    Failed,
    /// Not started because the run deadline had passed.
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub status: PartitionStatus,
    pub records_found: usize,
    pub parse_failures: usize,
    pub relevant: usize,
    pub new: usize,
    pub notified: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub error: Option<String>,
    /// New records (or would-be-new in a dry run), in extraction order.
    #[serde(skip)]
    pub new_records: Vec<ListingRecord>,
}

impl PartitionReport {
    fn new(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            ..Self::default()
        }
    }

    fn fail(mut self, e: impl std::fmt::Display) -> Self {
        self.status = PartitionStatus::Failed;
        self.error = Some(e.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub partitions: Vec<PartitionReport>,
}

impl RunSummary {
    fn count(&self, status: PartitionStatus) -> usize {
        self.partitions.iter().filter(|p| p.status == status).count()
    }

    fn total(&self, f: impl Fn(&PartitionReport) -> usize) -> usize {
        self.partitions.iter().map(f).sum()
    }

    pub fn attempted(&self) -> usize {
        self.partitions.len() - self.skipped()
    }

    pub fn succeeded(&self) -> usize {
        self.count(PartitionStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(PartitionStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(PartitionStatus::Skipped)
    }

    pub fn records_found(&self) -> usize {
        self.total(|p| p.records_found)
    }

    pub fn parse_failures(&self) -> usize {
        self.total(|p| p.parse_failures)
    }

    pub fn relevant(&self) -> usize {
        self.total(|p| p.relevant)
    }

    pub fn records_new(&self) -> usize {
        self.total(|p| p.new)
    }

    pub fn notified(&self) -> usize {
        self.total(|p| p.notified)
    }

    pub fn messages_sent(&self) -> usize {
        self.total(|p| p.messages_sent)
    }

    pub fn messages_failed(&self) -> usize {
        self.total(|p| p.messages_failed)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.partitions
            .iter()
            .filter_map(|p| p.error.as_deref().map(|e| (p.partition.as_str(), e)))
    }
}

/// Drives fetch, extract, filter, dedup and notify over the configured partitions.
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a dyn SeenStore,
    fetcher: &'a dyn Fetch,
    sink: &'a dyn Deliver,
    extractor: Extractor,
    filter: RelevanceFilter,
    dry_run: bool,
    /// Fingerprints a dry run would already have marked during this run.
    dry_run_seen: RefCell<HashSet<String>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn SeenStore,
        fetcher: &'a dyn Fetch,
        sink: &'a dyn Deliver,
        careers: CareerDirectory,
    ) -> Result<Self> {
        Ok(Self {
            config,
            store,
            fetcher,
            sink,
            extractor: Extractor::new(careers)?,
            filter: RelevanceFilter::new(&config.filter)?,
            dry_run: false,
            dry_run_seen: RefCell::new(HashSet::new()),
        })
    }

    /// Fetch, extract and filter only; the store is read but never written and nothing is sent.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self) -> RunSummary {
        self.run_until(Instant::now() + self.config.run.max_duration())
    }

    pub fn run_until(&self, deadline: Instant) -> RunSummary {
        info!(
            partitions = self.config.partitions.len(),
            dry_run = self.dry_run,
            "starting run"
        );
        self.dry_run_seen.borrow_mut().clear();
        let mut summary = RunSummary {
            dry_run: self.dry_run,
            partitions: Vec::with_capacity(self.config.partitions.len()),
        };

        for (i, partition) in self.config.partitions.iter().enumerate() {
            if i > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let pause = self.config.run.partition_delay().min(remaining);
                if !pause.is_zero() {
                    thread::sleep(pause);
                }
            }

            if Instant::now() >= deadline {
                warn!(partition = %partition.name, "run deadline passed, skipping partition");
                let mut report = PartitionReport::new(&partition.name);
                report.status = PartitionStatus::Skipped;
                report.error = Some(RunError::DeadlineExceeded.to_string());
                summary.partitions.push(report);
                continue;
            }

            summary.partitions.push(self.process(partition, deadline));
        }

        info!(
            attempted = summary.attempted(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            found = summary.records_found(),
            new = summary.records_new(),
            notified = summary.notified(),
            "run finished"
        );

        if self.config.delivery.post_summary && !self.dry_run {
            let dispatcher = Dispatcher::new(self.sink, &self.config.delivery);
            let outcome = dispatcher.send(None, &summary_message(&summary));
            if !outcome.is_delivered() {
                warn!(?outcome, "run summary not delivered");
            }
        }

        summary
    }

    /// One partition by name, for manual and diagnostic use.
    pub fn run_partition(&self, name: &str) -> Result<PartitionReport, RunError> {
        let partition = self
            .config
            .partition(name)
            .ok_or_else(|| RunError::UnknownPartition(name.to_string()))?;
        self.dry_run_seen.borrow_mut().clear();
        Ok(self.process(partition, Instant::now() + self.config.run.max_duration()))
    }

    fn process(&self, partition: &SearchPartition, deadline: Instant) -> PartitionReport {
        let report = PartitionReport::new(&partition.name);

        let url = match search_url(&self.config.search, partition) {
            Ok(url) => url,
            Err(e) => {
                error!(partition = %partition.name, error = %e, "cannot build search URL");
                return report.fail(RunError::Fetch(e));
            }
        };

        let document = match self.fetcher.fetch(&url) {
            Ok(document) => document,
            Err(e) => {
                error!(partition = %partition.name, error = %e, "fetch failed");
                let report = report.fail(RunError::Fetch(e));
                self.log_search(partition, &url, &report);
                return report;
            }
        };

        let report = self.handle_document(partition, &document, report, deadline);
        self.log_search(partition, &url, &report);
        report
    }

    fn handle_document(
        &self,
        partition: &SearchPartition,
        document: &str,
        mut report: PartitionReport,
        deadline: Instant,
    ) -> PartitionReport {
        let extraction = self.extractor.extract(document, partition);
        report.records_found = extraction.records.len();
        report.parse_failures = extraction.failures;
        if extraction.is_total_failure() {
            error!(
                partition = %partition.name,
                failures = extraction.failures,
                "no listing on the page could be parsed"
            );
            return report.fail(RunError::ExtractionFailed(extraction.failures));
        }

        let relevant: Vec<ListingRecord> = extraction
            .records
            .into_iter()
            .filter(|record| {
                let decision = self.filter.evaluate_for(partition, record);
                if let Decision::Reject(reason) = decision {
                    debug!(partition = %partition.name, title = %record.title, %reason, "rejected");
                }
                decision.is_relevant()
            })
            .collect();
        report.relevant = relevant.len();

        let now = Utc::now();
        for record in relevant {
            let fingerprint = record.fingerprint();
            let status = if self.dry_run {
                self.store.contains(&fingerprint).map(|seen| {
                    // a real run would have marked it in an earlier partition
                    let first_this_run = self.dry_run_seen.borrow_mut().insert(fingerprint.clone());
                    if seen || !first_this_run { SeenStatus::Duplicate } else { SeenStatus::New }
                })
            } else {
                self.store
                    .check_and_mark_at(&fingerprint, now, Some((partition.name.as_str(), &record)))
            };

            match status {
                Ok(SeenStatus::New) => report.new_records.push(record),
                Ok(SeenStatus::Duplicate) => {
                    debug!(partition = %partition.name, title = %record.title, "already seen");
                }
                Err(e) => {
                    error!(partition = %partition.name, error = %e, "store unavailable, abandoning partition");
                    report.new = report.new_records.len();
                    return report.fail(RunError::Store(e));
                }
            }
        }
        report.new = report.new_records.len();

        info!(
            partition = %partition.name,
            found = report.records_found,
            parse_failures = report.parse_failures,
            relevant = report.relevant,
            new = report.new,
            "partition processed"
        );

        if !self.dry_run {
            self.notify(partition, &mut report, deadline);
        }
        report
    }

    /// Sends the partition's new records in batches. Batches still queued when
    /// the deadline passes are counted as failed and left unsent.
    fn notify(&self, partition: &SearchPartition, report: &mut PartitionReport, deadline: Instant) {
        if report.new_records.is_empty() {
            return;
        }

        let messages = format_messages(
            report
                .new_records
                .iter()
                .map(|record| (partition.name.as_str(), record)),
            self.config.delivery.max_items_per_message,
        );
        let dispatcher = Dispatcher::new(self.sink, &self.config.delivery);

        for (i, message) in messages.iter().enumerate() {
            if i > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let pause = self.config.delivery.message_delay().min(remaining);
                if !pause.is_zero() {
                    thread::sleep(pause);
                }
            }

            if Instant::now() >= deadline {
                let unsent = messages.len() - i;
                warn!(partition = %partition.name, unsent, "run deadline passed, dropping remaining messages");
                report.messages_failed += unsent;
                report.status = PartitionStatus::Failed;
                report.error = Some(RunError::DeadlineExceeded.to_string());
                break;
            }

            if !dispatcher.send(self.config.channel_for(partition), message).is_delivered() {
                report.messages_failed += 1;
                continue;
            }
            report.messages_sent += 1;

            for fingerprint in &message.fingerprints {
                match self.store.mark_notified(fingerprint) {
                    Ok(()) => report.notified += 1,
                    Err(e) => warn!(%fingerprint, error = %e, "delivered but could not mark notified"),
                }
            }
        }
    }

    fn log_search(&self, partition: &SearchPartition, url: &str, report: &PartitionReport) {
        if self.dry_run {
            return;
        }
        let log = SearchLog {
            partition: partition.name.clone(),
            search_url: url.to_string(),
            records_found: report.records_found,
            records_new: report.new,
            success: report.status == PartitionStatus::Succeeded,
            error_message: report.error.clone(),
        };
        if let Err(e) = self.store.record_search(&log) {
            warn!(partition = %partition.name, error = %e, "failed to record search");
        }
    }
}

/// Exclusive marker for a run against one store. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// A lock older than `stale_after` is assumed left behind by a crashed run.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, RunError> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path, stale_after) {
                    return Err(RunError::RunInProgress(path.to_path_buf()));
                }
                warn!(path = %path.display(), "removing stale run lock");
                fs::remove_file(path)?;
                Self::create(path).map_err(|e| {
                    if e.kind() == ErrorKind::AlreadyExists {
                        RunError::RunInProgress(path.to_path_buf())
                    } else {
                        RunError::Lock(e)
                    }
                })
            }
            Err(e) => Err(RunError::Lock(e)),
        }
    }

    /// `jobwatch.db` -> `jobwatch.lock`
    pub fn path_for(database: &Path) -> PathBuf {
        database.with_extension("lock")
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= stale_after)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove run lock");
        }
    }
}
