//! Ingestion coordinator: normalize → segment → chunk → persist, with
//! content-hash idempotency.
//!
//! The `Ingestor` exclusively owns the write path to Work/Scene/Chunk/
//! IngestRun; the watcher, CLI, and HTTP surface are all callers of the same
//! three operations (`ingest`, `resegment`, `slice`).

pub mod chunk;
pub mod normalize;
pub mod segment;
pub mod store;

pub use chunk::{chunk_scene, make_chunks, ChunkSpan};
pub use normalize::{fingerprint_text, normalize, slice_by_chars, Normalized};
pub use segment::{strategy_for, SceneSpan, SegmentStrategy, PROFILE_NAMES};
pub use store::{PersistOutcome, RunParams, WorkSummary};

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::IngestConfig;
use crate::db::Db;
use crate::error::{FolioError, Result};
use crate::events::{now_iso, Event, EventEmitter};
use crate::extract::ExtractorRegistry;

/// One ingest request, as handed over by any caller.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub title: Option<String>,
    pub author: Option<String>,
    pub profile: Option<String>,
    pub window_chars: Option<usize>,
    pub stride_chars: Option<usize>,
    /// Caller label recorded on the run ("cli", "watcher", "http", ...)
    pub invoked_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub work_id: String,
    pub content_sha256: String,
    pub char_count: usize,
    pub scene_count: usize,
    pub chunk_count: usize,
    /// True when the fingerprint already existed and nothing was written
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResegmentOutcome {
    pub scene_count: usize,
    pub chunk_count: usize,
    pub run_id: String,
}

/// The ingestion coordinator.
pub struct Ingestor {
    db: Db,
    extractors: ExtractorRegistry,
    emitter: EventEmitter,
    defaults: IngestConfig,
    /// Advisory per-work serialization for resegmentation
    active_works: Mutex<HashSet<String>>,
}

/// Releases the advisory per-work lock when the run finishes.
struct WorkGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    work_id: String,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.work_id);
        }
    }
}

impl Ingestor {
    pub fn new(db: Db, emitter: EventEmitter, defaults: IngestConfig) -> Self {
        Self {
            db,
            extractors: ExtractorRegistry::new(),
            emitter,
            defaults,
            active_works: Mutex::new(HashSet::new()),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    fn lock_work(&self, work_id: &str) -> Result<WorkGuard<'_>> {
        let mut set = self
            .active_works
            .lock()
            .map_err(|_| FolioError::Config("work lock poisoned".to_string()))?;
        if !set.insert(work_id.to_string()) {
            return Err(FolioError::ConflictingRun(work_id.to_string()));
        }
        Ok(WorkGuard {
            active: &self.active_works,
            work_id: work_id.to_string(),
        })
    }

    /// Ingest one file: extract, normalize, fingerprint, and either return
    /// the existing work for that content or segment, chunk, and persist a
    /// new one transactionally.
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let extracted = self.extractors.extract(&req.path)?;
        let norm = normalize(&extracted.text);

        let profile = req
            .profile
            .clone()
            .unwrap_or_else(|| self.defaults.default_profile.clone());
        let window = req.window_chars.unwrap_or(self.defaults.window_chars);
        let stride = req.stride_chars.unwrap_or(self.defaults.stride_chars);
        let source = req
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        // Idempotency fast path: same fingerprint, nothing to write
        if let Some(work_id) = store::find_work_by_fingerprint(&self.db, &norm.fingerprint).await? {
            let (scene_count, chunk_count) = store::counts_for_work(&self.db, &work_id).await?;
            let outcome = IngestOutcome {
                work_id,
                content_sha256: norm.fingerprint,
                char_count: norm.char_count,
                scene_count,
                chunk_count,
                deduplicated: true,
            };
            self.emit_ingested(&outcome, &req, source, &profile, None)
                .await;
            return Ok(outcome);
        }

        let strategy = strategy_for(Some(&profile));
        let scenes = strategy.segment(&norm.text);
        let chunks = make_chunks(&scenes, window, stride)?;
        let (scene_count, chunk_count) = (scenes.len(), chunks.len());

        let run = RunParams {
            profile: strategy.name().to_string(),
            window_chars: window,
            stride_chars: stride,
            warnings: extracted.warnings,
            invoked_by: req.invoked_by.clone(),
        };

        let outcome = match store::persist_work(
            &self.db,
            req.title.clone(),
            req.author.clone(),
            source.clone(),
            norm.text,
            norm.char_count,
            norm.fingerprint.clone(),
            scenes,
            chunks,
            run,
        )
        .await?
        {
            PersistOutcome::Created { work_id, run_id } => {
                let outcome = IngestOutcome {
                    work_id,
                    content_sha256: norm.fingerprint,
                    char_count: norm.char_count,
                    scene_count,
                    chunk_count,
                    deduplicated: false,
                };
                self.emit_ingested(&outcome, &req, source, &profile, Some(run_id))
                    .await;
                outcome
            }
            // Lost the insert race to a concurrent identical ingest; the
            // winner's rows stand
            PersistOutcome::Duplicate { work_id } => {
                let (scene_count, chunk_count) =
                    store::counts_for_work(&self.db, &work_id).await?;
                let outcome = IngestOutcome {
                    work_id,
                    content_sha256: norm.fingerprint,
                    char_count: norm.char_count,
                    scene_count,
                    chunk_count,
                    deduplicated: true,
                };
                self.emit_ingested(&outcome, &req, source, &profile, None)
                    .await;
                outcome
            }
        };

        Ok(outcome)
    }

    async fn emit_ingested(
        &self,
        outcome: &IngestOutcome,
        req: &IngestRequest,
        source: Option<String>,
        profile: &str,
        run_id: Option<String>,
    ) {
        self.emitter
            .emit(&Event::Ingested {
                work_id: outcome.work_id.clone(),
                source,
                title: req.title.clone(),
                author: req.author.clone(),
                content_sha256: outcome.content_sha256.clone(),
                chars: outcome.char_count,
                scenes: outcome.scene_count,
                chunks: outcome.chunk_count,
                profile: profile.to_string(),
                run_id,
                deduplicated: outcome.deduplicated,
                created_at: now_iso(),
            })
            .await;
    }

    /// Re-derive scenes and chunks for an existing work under new parameters,
    /// superseding the current set.
    pub async fn resegment(
        &self,
        work_id: &str,
        profile: &str,
        window: usize,
        stride: usize,
    ) -> Result<ResegmentOutcome> {
        let _guard = self.lock_work(work_id)?;

        let (text, _char_count) = store::load_work_text(&self.db, work_id)
            .await?
            .ok_or_else(|| FolioError::NotFound(work_id.to_string()))?;

        let strategy = strategy_for(Some(profile));
        let scenes = strategy.segment(&text);
        let chunks = make_chunks(&scenes, window, stride)?;

        let run = RunParams {
            profile: strategy.name().to_string(),
            window_chars: window,
            stride_chars: stride,
            warnings: Vec::new(),
            invoked_by: "resegment".to_string(),
        };

        let (scene_count, chunk_count, run_id) = store::replace_segmentation(
            &self.db,
            work_id.to_string(),
            text,
            scenes,
            chunks,
            run,
        )
        .await?;

        Ok(ResegmentOutcome {
            scene_count,
            chunk_count,
            run_id,
        })
    }

    /// Exact substring of a work's canonical text by char offsets.
    pub async fn slice(&self, work_id: &str, start: usize, end: usize) -> Result<String> {
        let (text, char_count) = store::load_work_text(&self.db, work_id)
            .await?
            .ok_or_else(|| FolioError::NotFound(work_id.to_string()))?;
        if start > end || end > char_count {
            return Err(FolioError::RangeOutOfBounds {
                start,
                end,
                char_count,
            });
        }
        Ok(slice_by_chars(&text, start, end).to_string())
    }
}
