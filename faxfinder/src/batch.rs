//! Batch driver: looks up fax numbers for every record of a table
//!
//! Records are processed strictly one after another by a single worker:
//! - rows that already carry a fax number are skipped without network access
//! - every other row is looked up and gets either a fax number or an error detail
//! - a fixed pause follows each looked-up row
//! - the table is checkpointed every few rows and written once at the end
//!
//! Per-record failures never abort the batch. Only the final write can.

use crate::checkpoint::RecordSink;
use crate::config::BatchConfig;
use crate::events::{BatchEvent, CancelToken, EventSender, RunContext};
use crate::finder::FaxFinder;
use crate::records::RecordTable;
use crate::retry::Sleeper;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Checkpoint after every this many records
    pub checkpoint_interval: usize,
    /// Pause after each record that was looked up
    pub record_pause: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            record_pause: Duration::from_millis(2000),
        }
    }
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval.max(1),
            record_pause: config.record_pause(),
        }
    }
}

/// Tallies of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    /// Records reached before the run ended, skipped ones included
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchOutcome {
    fn start(total: usize) -> Self {
        let now = Utc::now();
        Self {
            total,
            processed: 0,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Write the outcome as pretty-printed JSON.
pub fn export_summary(outcome: &BatchOutcome, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome).context("Failed to serialize batch summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write batch summary: {}", path.display()))?;
    Ok(())
}

pub struct BatchDriver {
    finder: FaxFinder,
    sleeper: Arc<dyn Sleeper>,
    settings: BatchSettings,
}

impl BatchDriver {
    pub fn new(finder: FaxFinder, sleeper: Arc<dyn Sleeper>, settings: BatchSettings) -> Self {
        Self {
            finder,
            sleeper,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Run every record of `table` through the finder.
    ///
    /// Emits exactly one terminal event. Returns an error only when the final
    /// write through `sink` fails.
    pub async fn process(
        &self,
        table: &mut RecordTable,
        sink: &mut dyn RecordSink,
        ctx: &RunContext,
    ) -> Result<BatchOutcome> {
        let events = &ctx.events;
        let total = table.len();
        let mut outcome = BatchOutcome::start(total);
        info!("Processing {} records", total);

        for i in 0..total {
            if ctx.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let index = i + 1;
            let record = &mut table.records_mut()[i];
            events.send(BatchEvent::Progress {
                name: record.name.clone(),
                index,
                total,
            });

            if record.has_fax() {
                events.log(format!("{}: already has a fax number, skipping", record.name));
                outcome.skipped_count += 1;
            } else {
                record.error_detail = None;
                match self.finder.lookup(&record.name, record.url.as_deref(), events).await {
                    Ok(found) => {
                        events.log(format!("{}: {} ({})", record.name, found.number, found.url));
                        record.fax = Some(found.number);
                        outcome.success_count += 1;
                    }
                    Err(e) => {
                        events.log(format!("{}: {}", record.name, e.detail()));
                        record.fax = None;
                        record.error_detail = Some(e.detail());
                        outcome.error_count += 1;
                    }
                }
                self.sleeper.sleep(self.settings.record_pause).await;
            }
            outcome.processed = index;

            if index % self.settings.checkpoint_interval == 0 && index < total {
                if let Err(e) = sink.checkpoint(table, index) {
                    warn!("Checkpoint after {} records failed: {:#}", index, e);
                    events.log(format!("Checkpoint after {} records failed: {:#}", index, e));
                }
            }
        }

        outcome.finished_at = Utc::now();
        if let Err(e) = sink.finish(table, !outcome.cancelled) {
            let reason = format!("Failed to write results: {:#}", e);
            events.send(BatchEvent::Failed { reason: reason.clone() });
            return Err(e.context(reason));
        }

        if outcome.cancelled {
            info!("Batch cancelled after {} of {} records", outcome.processed, total);
            events.send(BatchEvent::Cancelled {
                processed: outcome.processed,
            });
        } else {
            info!(
                "Batch complete: {} found, {} errors, {} skipped",
                outcome.success_count, outcome.error_count, outcome.skipped_count
            );
            events.send(BatchEvent::Completed {
                success_count: outcome.success_count,
                error_count: outcome.error_count,
                skipped_count: outcome.skipped_count,
            });
        }
        Ok(outcome)
    }
}

/// A batch running on a background task.
pub struct BatchHandle {
    events: UnboundedReceiver<BatchEvent>,
    cancel: CancelToken,
    task: JoinHandle<Result<(RecordTable, BatchOutcome)>>,
}

impl BatchHandle {
    /// Next event, or `None` once the worker has finished and the stream is drained.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Stop before the next record. The current record finishes normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the worker and take the table back.
    pub async fn join(self) -> Result<(RecordTable, BatchOutcome)> {
        self.task.await.context("Batch worker panicked")?
    }
}

/// Move `table` onto a worker task. The caller keeps only the event stream
/// and the cancel token until [`BatchHandle::join`].
pub fn spawn_batch<S>(driver: Arc<BatchDriver>, mut table: RecordTable, mut sink: S) -> BatchHandle
where
    S: RecordSink + 'static,
{
    let (events, rx) = EventSender::channel();
    let cancel = CancelToken::new();
    let ctx = RunContext::new(cancel.clone(), events);

    let task = tokio::spawn(async move {
        let outcome = driver.process(&mut table, &mut sink, &ctx).await?;
        Ok((table, outcome))
    });

    BatchHandle {
        events: rx,
        cancel,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemorySink;
    use crate::config::AppConfig;
    use crate::fetch::{FetchError, PageFetcher};
    use crate::records::Record;
    use crate::retry::RecordingSleeper;
    use crate::search::SearchProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAX_PAGE: &str = "<table><tr><td>FAX</td><td>03-1111-2222</td></tr></table>";

    #[derive(Default)]
    struct CountingSearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchProvider for CountingSearch {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<String>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FaxPages {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for FaxPages {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("blank") {
                Ok("<p>お問い合わせはメールで</p>".to_string())
            } else {
                Ok(FAX_PAGE.to_string())
            }
        }
    }

    struct Harness {
        driver: BatchDriver,
        search: Arc<CountingSearch>,
        pages: Arc<FaxPages>,
        sleeper: RecordingSleeper,
    }

    fn harness() -> Harness {
        let search = Arc::new(CountingSearch::default());
        let pages = Arc::new(FaxPages::default());
        let sleeper = RecordingSleeper::new();
        let mut config = AppConfig::default();
        config.detail.enabled = false;
        let finder = FaxFinder::new(search.clone(), pages.clone(), Arc::new(sleeper.clone()), &config).unwrap();
        let driver = BatchDriver::new(finder, Arc::new(sleeper.clone()), BatchSettings::default());
        Harness {
            driver,
            search,
            pages,
            sleeper,
        }
    }

    fn numbered(n: usize) -> RecordTable {
        RecordTable::new(
            (1..=n)
                .map(|i| Record::new(format!("Clinic {}", i), Some(&format!("http://x.test/{}", i))))
                .collect(),
        )
    }

    // ============ Record Transition Tests ============

    #[tokio::test]
    async fn test_found_and_not_found_records() {
        let h = harness();
        let mut table = RecordTable::new(vec![
            Record::new("Sample Clinic", Some("http://x.test/a")),
            Record::new("Quiet Clinic", Some("http://x.test/blank")),
        ]);
        table.records_mut()[0].error_detail = Some("stale".into());
        let mut sink = MemorySink::default();

        let outcome = h
            .driver
            .process(&mut table, &mut sink, &RunContext::default())
            .await
            .unwrap();

        let found = &table.records()[0];
        assert_eq!(found.fax.as_deref(), Some("03-1111-2222"));
        assert_eq!(found.error_detail, None);
        let missing = &table.records()[1];
        assert_eq!(missing.fax, None);
        assert!(missing.error_detail.as_deref().unwrap().starts_with("NoMatchFound"));
        assert_eq!((outcome.success_count, outcome.error_count, outcome.skipped_count), (1, 1, 0));
        assert_eq!(sink.finishes, vec![true]);
    }

    #[tokio::test]
    async fn test_prefilled_fax_is_skipped_without_network() {
        let h = harness();
        let mut table = RecordTable::new(vec![Record::new("Done Clinic", None).with_fax("03-9999-0000")]);
        let mut sink = MemorySink::default();

        let outcome = h
            .driver
            .process(&mut table, &mut sink, &RunContext::default())
            .await
            .unwrap();

        assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.pages.calls.load(Ordering::SeqCst), 0);
        assert_eq!((outcome.success_count, outcome.error_count, outcome.skipped_count), (0, 0, 1));
        assert!(h.sleeper.durations().is_empty());
        assert_eq!(table.records()[0].fax.as_deref(), Some("03-9999-0000"));
    }

    #[tokio::test]
    async fn test_empty_name_fails_without_network() {
        let h = harness();
        let mut table = RecordTable::new(vec![Record::new("  ", None)]);

        h.driver
            .process(&mut table, &mut MemorySink::default(), &RunContext::default())
            .await
            .unwrap();

        assert!(table.records()[0].error_detail.as_deref().unwrap().starts_with("UnexpectedError"));
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_follows_each_lookup() {
        let h = harness();
        let mut table = numbered(2);

        h.driver
            .process(&mut table, &mut MemorySink::default(), &RunContext::default())
            .await
            .unwrap();

        // pacing before each page fetch, then the record pause
        let pause = Duration::from_millis(2000);
        let pacing = Duration::from_secs(5);
        assert_eq!(h.sleeper.durations(), vec![pacing, pause, pacing, pause]);
    }

    // ============ Checkpoint Tests ============

    #[tokio::test]
    async fn test_checkpoints_every_ten_records() {
        let h = harness();
        let mut table = numbered(25);
        let mut sink = MemorySink::default();

        h.driver
            .process(&mut table, &mut sink, &RunContext::default())
            .await
            .unwrap();

        assert_eq!(sink.checkpoints, vec![10, 20]);
        assert_eq!(sink.finishes, vec![true]);
    }

    #[tokio::test]
    async fn test_no_checkpoint_on_last_record() {
        let h = harness();
        let mut table = numbered(20);
        let mut sink = MemorySink::default();

        h.driver
            .process(&mut table, &mut sink, &RunContext::default())
            .await
            .unwrap();

        assert_eq!(sink.checkpoints, vec![10]);
        assert_eq!(sink.finishes, vec![true]);
    }

    struct FailingSink {
        fail_finish: bool,
        finishes: usize,
    }

    impl RecordSink for FailingSink {
        fn checkpoint(&mut self, _table: &RecordTable, _processed: usize) -> Result<()> {
            anyhow::bail!("disk full")
        }

        fn finish(&mut self, _table: &RecordTable, _completed: bool) -> Result<()> {
            self.finishes += 1;
            if self.fail_finish {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_stop_batch() {
        let h = harness();
        let mut table = numbered(12);
        let mut sink = FailingSink {
            fail_finish: false,
            finishes: 0,
        };

        let outcome = h
            .driver
            .process(&mut table, &mut sink, &RunContext::default())
            .await
            .unwrap();
        assert_eq!(outcome.success_count, 12);
        assert_eq!(sink.finishes, 1);
    }

    #[tokio::test]
    async fn test_final_write_failure_is_fatal() {
        let h = harness();
        let (events, mut rx) = EventSender::channel();
        let ctx = RunContext::new(CancelToken::new(), events);
        let mut sink = FailingSink {
            fail_finish: true,
            finishes: 0,
        };

        let result = h.driver.process(&mut numbered(1), &mut sink, &ctx).await;
        assert!(result.is_err());
        drop(ctx);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(BatchEvent::Failed { .. })));
    }

    // ============ Event and Cancellation Tests ============

    #[tokio::test]
    async fn test_spawned_batch_reports_progress_and_completion() {
        let h = harness();
        let mut handle = spawn_batch(Arc::new(h.driver), numbered(3), MemorySink::default());

        let mut progress = Vec::new();
        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            match event {
                BatchEvent::Progress { index, total, .. } => progress.push((index, total)),
                BatchEvent::Log { .. } => {}
                other => terminal = Some(other),
            }
        }

        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(
            terminal,
            Some(BatchEvent::Completed {
                success_count: 3,
                error_count: 0,
                skipped_count: 0
            })
        );
        let (table, outcome) = handle.join().await.unwrap();
        assert!(table.records().iter().all(|r| r.has_fax()));
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_before_start_processes_nothing() {
        let h = harness();
        let ctx = RunContext::default();
        ctx.cancel.cancel();
        let mut sink = MemorySink::default();

        let outcome = h.driver.process(&mut numbered(5), &mut sink, &ctx).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, 0);
        assert_eq!(h.pages.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.finishes, vec![false]);
    }

    /// Sets the cancel flag while the first page is being fetched.
    struct CancellingPages {
        token: CancelToken,
    }

    #[async_trait]
    impl PageFetcher for CancellingPages {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            self.token.cancel();
            Ok(FAX_PAGE.to_string())
        }
    }

    #[tokio::test]
    async fn test_cancel_takes_effect_at_next_record() {
        let token = CancelToken::new();
        let sleeper = Arc::new(RecordingSleeper::new());
        let finder = FaxFinder::new(
            Arc::new(CountingSearch::default()),
            Arc::new(CancellingPages { token: token.clone() }),
            sleeper.clone(),
            &AppConfig::default(),
        )
        .unwrap();
        let driver = BatchDriver::new(finder, sleeper, BatchSettings::default());
        let (events, mut rx) = EventSender::channel();
        let ctx = RunContext::new(token, events);
        let mut table = numbered(5);
        let mut sink = MemorySink::default();

        let outcome = driver.process(&mut table, &mut sink, &ctx).await.unwrap();
        drop(ctx);

        // The record in flight when the flag was set still completes.
        assert!(table.records()[0].has_fax());
        assert!(!table.records()[1].has_fax());
        assert_eq!(outcome.processed, 1);
        assert_eq!(sink.finishes, vec![false]);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(BatchEvent::Cancelled { processed: 1 }));
    }

    #[test]
    fn test_summary_export() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let mut outcome = BatchOutcome::start(3);
        outcome.success_count = 2;

        export_summary(&outcome, &path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"success_count\": 2"));
        assert!(json.contains("\"started_at\""));
    }
}
