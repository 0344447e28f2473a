use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::enroll::{EnrollmentPipeline, is_valid_user_id};
use crate::error::PipelineError;

/// File extensions treated as photos (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff"];

/// A photo file that appeared or changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoArrival {
    pub path: PathBuf,
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// The user_id encoded in a photo filename: its base name without
/// extension, which must be a token of ASCII letters, digits, `_` and `-`.
pub fn parse_user_id(path: &Path) -> Result<String, PipelineError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| is_valid_user_id(s))
        .map(str::to_string)
        .ok_or_else(|| PipelineError::MalformedFilename(path.to_path_buf()))
}

/// Queue every photo already present in `dir`, in filename order. Returns
/// the number queued.
pub async fn scan_dir(dir: &Path, tx: &mpsc::Sender<PhotoArrival>) -> Result<usize, PipelineError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let n = paths.len();
    for path in paths {
        if tx.send(PhotoArrival { path }).await.is_err() {
            break;
        }
    }
    Ok(n)
}

/// DirWatcher forwards photo create/write events in one directory into a
/// bounded queue. Dropping it stops watching.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
}

impl DirWatcher {
    pub fn start(dir: &Path, tx: mpsc::Sender<PhotoArrival>) -> Result<Self, PipelineError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "pipeline: watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_))
            ) {
                return;
            }
            for path in event.paths {
                if !is_image(&path) {
                    continue;
                }
                // Runs on the notify thread; blocks while the queue is full.
                if tx.blocking_send(PhotoArrival { path }).is_err() {
                    debug!("pipeline: arrival queue closed");
                    return;
                }
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "pipeline: watching for photos");
        Ok(Self { _watcher: watcher })
    }
}

/// Stop watching and wait for `worker` to enroll everything still queued.
/// The watcher must hold the last sender of the worker's queue.
pub async fn drain(
    watcher: DirWatcher,
    worker: JoinHandle<WorkerSummary>,
) -> Result<WorkerSummary, PipelineError> {
    drop(watcher);
    let summary = worker
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?;
    info!(
        enrolled = summary.enrolled,
        rejected = summary.rejected,
        failed = summary.failed,
        "pipeline: arrival queue drained"
    );
    Ok(summary)
}

/// Counts reported by an [`EnrollWorker`] when its queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub enrolled: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// EnrollWorker drains the arrival queue one photo at a time.
pub struct EnrollWorker;

impl EnrollWorker {
    pub fn spawn(
        pipeline: EnrollmentPipeline,
        mut rx: mpsc::Receiver<PhotoArrival>,
    ) -> JoinHandle<WorkerSummary> {
        tokio::spawn(async move {
            let mut summary = WorkerSummary::default();
            while let Some(arrival) = rx.recv().await {
                match Self::handle(&pipeline, &arrival).await {
                    Ok(()) => summary.enrolled += 1,
                    Err(e @ PipelineError::MalformedFilename(_)) => {
                        warn!(error = %e, "pipeline: photo rejected");
                        summary.rejected += 1;
                    }
                    Err(e) => {
                        error!(path = %arrival.path.display(), error = %e, "pipeline: enrollment failed");
                        summary.failed += 1;
                    }
                }
            }
            debug!(?summary, "pipeline: enroll worker stopped");
            summary
        })
    }

    async fn handle(pipeline: &EnrollmentPipeline, arrival: &PhotoArrival) -> Result<(), PipelineError> {
        let user_id = parse_user_id(&arrival.path)?;
        let photo = tokio::fs::read(&arrival.path).await?;
        pipeline.enroll(&user_id, &photo).await?;
        Ok(())
    }
}
