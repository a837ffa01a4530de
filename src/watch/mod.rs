//! Folder watcher: discover candidate files, enforce stability and admission
//! policy, and schedule them onto a bounded worker pool that calls the
//! ingestion coordinator.
//!
//! One scan loop owns all scheduling decisions; workers only process and
//! report back through the shared item table. The bounded queue is the sole
//! backpressure mechanism: when it is full, stabilized items stay where they
//! are and get re-offered on the next scan instead of being dropped.

pub mod item;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::error::{FolioError, Result};
use crate::events::{now_iso, Event};
use crate::ingest::{IngestRequest, Ingestor};
use item::{ItemState, WatchItem};

/// File name suffixes skipped permanently during discovery.
const IGNORED_SUFFIXES: &[&str] = &[
    ".part",
    ".partial",
    ".tmp",
    ".crdownload",
    ".download",
    ".lock",
    ".err.json",
];

fn is_ignored(file_name: &str) -> bool {
    file_name.starts_with('.') || IGNORED_SUFFIXES.iter().any(|s| file_name.ends_with(s))
}

/// The owned watcher scheduler: scan loop plus worker pool.
pub struct FolderWatcher {
    shared: Arc<Shared>,
}

struct Shared {
    cfg: WatcherConfig,
    ingestor: Arc<Ingestor>,
    items: Mutex<HashMap<PathBuf, WatchItem>>,
}

impl Shared {
    fn stability_window(&self) -> Duration {
        Duration::from_millis(self.cfg.stability_ms)
    }

    fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.cfg.backoff_base_ms)
    }

    fn max_file_bytes(&self) -> u64 {
        self.cfg.max_file_mb * 1024 * 1024
    }

    fn profile_label(&self) -> String {
        self.cfg
            .profile
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    fn set_state(&self, path: &Path, state: ItemState) {
        if let Ok(mut items) = self.items.lock() {
            if let Some(item) = items.get_mut(path) {
                item.state = state;
            }
        }
    }
}

/// What the scan decided for one item, executed after the table lock drops.
enum ScanAction {
    Offer { path: PathBuf, prev: ItemState },
    Reject { path: PathBuf, reason: String },
}

impl FolderWatcher {
    pub fn new(cfg: WatcherConfig, ingestor: Arc<Ingestor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cfg,
                ingestor,
                items: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Run until the shutdown channel fires (or its sender drops), then drain
    /// in-flight work and join the pool.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let cfg = &self.shared.cfg;
        fs::create_dir_all(&cfg.inbox).map_err(FolioError::Io)?;
        fs::create_dir_all(&cfg.success_dir).map_err(FolioError::Io)?;
        fs::create_dir_all(&cfg.fail_dir).map_err(FolioError::Io)?;

        let (tx, rx) = mpsc::channel::<PathBuf>(cfg.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..cfg.workers {
            let shared = self.shared.clone();
            let rx = rx.clone();
            workers.spawn(async move { worker_loop(worker_id, shared, rx).await });
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(cfg.poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "watching {} (success={}, fail={}, workers={}, queue={})",
            cfg.inbox.display(),
            cfg.success_dir.display(),
            cfg.fail_dir.display(),
            cfg.workers,
            cfg.queue_capacity
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = scan_once(&self.shared, &tx).await {
                        log::error!("inbox scan failed: {e}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        log::info!("watcher stopping: draining in-flight items");
        drop(tx);
        while workers.join_next().await.is_some() {}
        Ok(())
    }
}

/// One discovery pass: update stability state, apply admission policy, and
/// offer eligible items to the queue.
async fn scan_once(shared: &Arc<Shared>, tx: &mpsc::Sender<PathBuf>) -> Result<()> {
    let candidates = discover(&shared.cfg)?;
    let now = Instant::now();
    let stability = shared.stability_window();
    let max_bytes = shared.max_file_bytes();

    let mut actions = Vec::new();
    {
        let mut items = shared
            .items
            .lock()
            .map_err(|_| FolioError::Config("watch item table poisoned".to_string()))?;

        for (path, size) in &candidates {
            let entry = items
                .entry(path.clone())
                .or_insert_with(|| WatchItem::new(path.clone(), *size, now));
            match entry.state {
                ItemState::Queued | ItemState::Processing | ItemState::Done => {}
                ItemState::AwaitingRetry => {
                    if entry.retry_eligible(now) {
                        entry.state = ItemState::Queued;
                        actions.push(ScanAction::Offer {
                            path: path.clone(),
                            prev: ItemState::AwaitingRetry,
                        });
                    }
                }
                ItemState::Stabilizing => {
                    entry.observe_size(*size, now);
                    if !entry.is_stable(stability, now) {
                        continue;
                    }
                    let ext = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("")
                        .to_lowercase();
                    if !shared.cfg.allowed_extensions.iter().any(|a| a == &ext) {
                        entry.state = ItemState::Done;
                        actions.push(ScanAction::Reject {
                            path: path.clone(),
                            reason: format!("Unsupported file type .{ext}"),
                        });
                    } else if *size > max_bytes {
                        entry.state = ItemState::Done;
                        actions.push(ScanAction::Reject {
                            path: path.clone(),
                            reason: format!(
                                "File exceeds size limit ({size} > {max_bytes} bytes)"
                            ),
                        });
                    } else {
                        entry.state = ItemState::Queued;
                        actions.push(ScanAction::Offer {
                            path: path.clone(),
                            prev: ItemState::Stabilizing,
                        });
                    }
                }
            }
        }

        // Forget files that left the inbox with nothing in flight
        let present: HashSet<&PathBuf> = candidates.iter().map(|(p, _)| p).collect();
        items.retain(|path, entry| {
            present.contains(path)
                || matches!(
                    entry.state,
                    ItemState::Queued | ItemState::Processing | ItemState::AwaitingRetry
                )
        });
    }

    for action in actions {
        match action {
            ScanAction::Offer { path, prev } => match tx.try_send(path.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Backpressure: hold the item back and re-offer next scan
                    shared.set_state(&path, prev);
                    log::debug!("queue full, holding back {}", path.display());
                }
                Err(TrySendError::Closed(_)) => break,
            },
            ScanAction::Reject { path, reason } => {
                route_failure(shared, &path, &reason, "admission").await;
            }
        }
    }
    Ok(())
}

/// Candidate files in the inbox with their current sizes, sorted for a
/// deterministic offer order.
fn discover(cfg: &WatcherConfig) -> Result<Vec<(PathBuf, u64)>> {
    let mut out = Vec::new();
    if cfg.recursive {
        for entry in WalkDir::new(&cfg.inbox).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if is_ignored(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| {
                FolioError::Config(format!("metadata for {}: {e}", entry.path().display()))
            })?;
            out.push((entry.path().to_path_buf(), meta.len()));
        }
    } else {
        for entry in fs::read_dir(&cfg.inbox).map_err(FolioError::Io)? {
            let entry = entry.map_err(FolioError::Io)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if is_ignored(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let meta = entry.metadata().map_err(FolioError::Io)?;
            out.push((path, meta.len()));
        }
    }
    out.sort();
    Ok(out)
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PathBuf>>>,
) {
    loop {
        let path = { rx.lock().await.recv().await };
        let Some(path) = path else { break };
        process_item(&shared, &path).await;
    }
    log::debug!("worker {worker_id} exiting");
}

/// One attempt for one queued item: ingest, then route the file.
async fn process_item(shared: &Arc<Shared>, path: &Path) {
    shared.set_state(path, ItemState::Processing);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty());

    let request = IngestRequest {
        path: path.to_path_buf(),
        title,
        author: None,
        profile: shared.cfg.profile.clone(),
        window_chars: None,
        stride_chars: None,
        invoked_by: "watcher".to_string(),
    };

    let attempt = async {
        let outcome = shared.ingestor.ingest(request).await?;
        let dst = shared
            .cfg
            .success_dir
            .join(format!("{}__{}", outcome.work_id, file_name));
        move_file(path, &dst)?;
        Ok::<crate::ingest::IngestOutcome, FolioError>(outcome)
    }
    .await;

    match attempt {
        Ok(outcome) => {
            shared.set_state(path, ItemState::Done);
            log::info!(
                "✓ {} → work {} ({} scenes, {} chunks{})",
                file_name,
                outcome.work_id,
                outcome.scene_count,
                outcome.chunk_count,
                if outcome.deduplicated {
                    ", duplicate content"
                } else {
                    ""
                }
            );
        }
        Err(e) => {
            let attempts = {
                let mut items = match shared.items.lock() {
                    Ok(items) => items,
                    Err(_) => return,
                };
                match items.get_mut(path) {
                    Some(entry) => {
                        entry.attempts += 1;
                        entry.attempts
                    }
                    None => return,
                }
            };
            if e.is_transient() && attempts < shared.cfg.max_attempts {
                if let Ok(mut items) = shared.items.lock() {
                    if let Some(entry) = items.get_mut(path) {
                        entry.park_for_retry(shared.backoff_base(), Instant::now());
                    }
                }
                log::warn!(
                    "transient failure for {} (attempt {}/{}): {}",
                    file_name,
                    attempts,
                    shared.cfg.max_attempts,
                    e
                );
            } else {
                route_failure(shared, path, &e.to_string(), e.stage()).await;
            }
        }
    }
}

/// Terminal failure routing: move the file to the fail area, write the
/// structured error record beside it, and emit the failure event.
async fn route_failure(shared: &Arc<Shared>, path: &Path, reason: &str, stage: &str) {
    shared.set_state(path, ItemState::Done);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let dst = shared.cfg.fail_dir.join(format!("{ts}__{file_name}"));

    if let Err(e) = move_file(path, &dst) {
        log::error!("failed to move {} to fail area: {e}", path.display());
    }

    let record = serde_json::json!({
        "message": reason,
        "stage": stage,
        "profile": shared.profile_label(),
        "created_at": now_iso(),
    });
    let err_path = shared
        .cfg
        .fail_dir
        .join(format!("{ts}__{file_name}.err.json"));
    match serde_json::to_string_pretty(&record) {
        Ok(body) => {
            if let Err(e) = fs::write(&err_path, body) {
                log::error!("failed to write error record {}: {e}", err_path.display());
            }
        }
        Err(e) => log::error!("failed to serialize error record: {e}"),
    }

    shared
        .ingestor
        .emitter()
        .emit(&Event::Failed {
            path: dst.display().to_string(),
            reason: reason.to_string(),
            stage: stage.to_string(),
            profile: shared.profile_label(),
            created_at: now_iso(),
        })
        .await;

    log::warn!("✗ {file_name}: {reason} ({stage})");
}

/// Rename with a copy+remove fallback for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst).map_err(FolioError::Io)?;
            fs::remove_file(src).map_err(FolioError::Io)?;
            Ok(())
        }
    }
}
