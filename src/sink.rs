use crate::pretty::{self, DisplayOptions};
use crate::types::{ProbeOutcome, RunState};
use eyre::{Result, WrapErr};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lines waiting for the writer before `record` starts to wait.
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Append-only results file owned by a single writer task. Workers hand
/// over whole lines through a channel, so lines never interleave and no
/// worker touches the file.
#[derive(Debug)]
struct OutputWriter {
    path: PathBuf,
    lines: Mutex<Option<mpsc::Sender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OutputWriter {
    /// Truncates any previous contents, reopens in append mode and starts
    /// the writer. Must be called inside a tokio runtime.
    fn create(path: &Path, state: Arc<RunState>, persisted: Arc<AtomicU64>) -> Result<Self> {
        File::create(path)
            .wrap_err_with(|| format!("Failed to create output file {}", path.display()))?;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("Failed to open output file {} for append", path.display()))?;

        log::debug!("[sink] output_created: path={}", path.display());

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let task = tokio::spawn(write_lines(
            path.to_path_buf(),
            tokio::fs::File::from_std(file),
            rx,
            state,
            persisted,
        ));

        Ok(Self {
            path: path.to_path_buf(),
            lines: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Queues one line; false once the writer has been closed.
    async fn submit(&self, line: String) -> bool {
        let sender = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match sender {
            Some(sender) => sender.send(line).await.is_ok(),
            None => false,
        }
    }

    /// Stops accepting lines and waits until everything queued is on disk.
    async fn close(&self) -> Result<()> {
        drop(self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take());
        let task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();

        if let Some(task) = task {
            task.await
                .wrap_err_with(|| format!("Writer for {} panicked", self.path.display()))?;
        }
        Ok(())
    }
}

async fn write_lines(
    path: PathBuf,
    mut file: tokio::fs::File,
    mut lines: mpsc::Receiver<String>,
    state: Arc<RunState>,
    persisted: Arc<AtomicU64>,
) {
    while let Some(line) = lines.recv().await {
        match file.write_all(line.as_bytes()).await {
            Ok(()) => {
                persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!("[sink] write_failed: path={} error={}", path.display(), e);
                state.record_write_failure();
            }
        }
    }

    if let Err(e) = file.flush().await {
        log::error!("[sink] flush_failed: path={} error={}", path.display(), e);
    }
    log::debug!("[sink] writer_stopped: path={} persisted={}", path.display(), persisted.load(Ordering::Relaxed));
}

/// Final stop for every outcome: persist if eligible, count, display.
#[derive(Debug)]
pub struct ResultSink {
    output: Option<OutputWriter>,
    state: Arc<RunState>,
    display: DisplayOptions,
    persisted: Arc<AtomicU64>,
}

impl ResultSink {
    /// Fails before any work is dispatched if `output` cannot be written.
    pub fn create(output: Option<&Path>, state: Arc<RunState>, display: DisplayOptions) -> Result<Self> {
        let persisted = Arc::new(AtomicU64::new(0));
        let output = output
            .map(|path| OutputWriter::create(path, Arc::clone(&state), Arc::clone(&persisted)))
            .transpose()?;
        if output.is_none() {
            log::debug!("[sink] display_only: no output path configured");
        }

        Ok(Self {
            output,
            state,
            display,
            persisted,
        })
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_ref().map(|output| output.path.as_path())
    }

    /// Lines written so far. Exact once [`ResultSink::finish`] returned.
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Consumes one outcome and returns the progress value it produced.
    pub async fn record(&self, outcome: &ProbeOutcome) -> u64 {
        if outcome.is_persistable() {
            if let Some(output) = &self.output {
                if !output.submit(outcome.to_line()).await {
                    log::error!("[sink] write_after_close: path={} target={}",
                        output.path.display(), outcome.target);
                    self.state.record_write_failure();
                }
            }
        }

        let progress = self.state.complete(outcome.classification);
        log::trace!("[sink] recorded: target={} status={} classification={} progress={}/{}",
            outcome.target, outcome.status, outcome.classification.as_str(), progress, self.state.total());

        pretty::print_outcome(progress, self.state.total(), outcome, &self.display);
        progress
    }

    /// Drains the writer. Later persistable outcomes count as write failures.
    pub async fn finish(&self) -> Result<()> {
        if let Some(output) = &self.output {
            output.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;
    use crate::types::Classification;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn ip(last: u32) -> Target {
        Target::Ip(std::net::Ipv4Addr::from(0x0a00_0000 + last).into())
    }

    fn quiet() -> DisplayOptions {
        DisplayOptions { hide_negative: true }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_stay_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        let state = Arc::new(RunState::new(64));
        let sink = Arc::new(ResultSink::create(Some(&path), Arc::clone(&state), quiet()).unwrap());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let outcome = ProbeOutcome::new(ip(i), 200, Classification::Positive)
                        .with_banner("cloudflare")
                        .with_extra(format!("CF-RAY: {}-{}", "x".repeat(200), i));
                    sink.record(&outcome).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        sink.finish().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 64);

        let mut targets = HashSet::new();
        for line in &lines {
            let fields: Vec<&str> = line.split('\t').collect();
            assert_eq!(fields.len(), 4, "corrupt line: {}", line);
            assert_eq!(fields[1], "200");
            assert_eq!(fields[2], "cloudflare");
            targets.insert(fields[0].to_string());
        }
        assert_eq!(targets.len(), 64);
        assert_eq!(state.progress(), 64);
        assert_eq!(sink.persisted(), 64);
    }

    #[tokio::test]
    async fn test_only_positive_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        let state = Arc::new(RunState::new(4));
        let sink = ResultSink::create(Some(&path), Arc::clone(&state), quiet()).unwrap();

        sink.record(&ProbeOutcome::new(ip(1), 200, Classification::Positive)).await;
        sink.record(&ProbeOutcome::new(ip(2), 302, Classification::Ignored)).await;
        sink.record(&ProbeOutcome::new(ip(3), 307, Classification::Ignored)).await;
        sink.record(&ProbeOutcome::negative(ip(4), "connection refused")).await;
        sink.finish().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "10.0.0.1\t200\t-\t-\n");
        assert_eq!(state.progress(), 4);

        let summary = state.summary(false);
        assert_eq!(summary.ignored, 2);
        assert_eq!(summary.negative, 1);
    }

    #[tokio::test]
    async fn test_create_truncates_previous_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        std::fs::write(&path, "stale\tline\n").unwrap();

        let sink = ResultSink::create(Some(&path), Arc::new(RunState::new(0)), quiet()).unwrap();
        sink.finish().await.unwrap();

        assert_eq!(sink.output_path(), Some(path.as_path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_unwritable_output_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("results.txt");

        let result = ResultSink::create(Some(&path), Arc::new(RunState::new(1)), quiet());

        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("results.txt"));
    }

    #[tokio::test]
    async fn test_record_after_finish_counts_write_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        let state = Arc::new(RunState::new(2));
        let sink = ResultSink::create(Some(&path), Arc::clone(&state), quiet()).unwrap();

        sink.record(&ProbeOutcome::new(ip(1), 200, Classification::Positive)).await;
        sink.finish().await.unwrap();
        sink.record(&ProbeOutcome::new(ip(2), 200, Classification::Positive)).await;

        let summary = state.summary(false);
        assert_eq!(summary.progress, 2);
        assert_eq!(summary.write_failures, 1);
        assert_eq!(sink.persisted(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_display_only_sink_counts() {
        let state = Arc::new(RunState::new(2));
        let sink = ResultSink::create(None, Arc::clone(&state), quiet()).unwrap();

        assert_eq!(sink.record(&ProbeOutcome::new(ip(1), 200, Classification::Positive)).await, 1);
        assert_eq!(sink.record(&ProbeOutcome::error(ip(2), "bad name")).await, 2);
        sink.finish().await.unwrap();
        assert_eq!(sink.persisted(), 0);
        assert!(sink.output_path().is_none());
    }
}
