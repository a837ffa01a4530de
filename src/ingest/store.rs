//! Transactional persistence for the canonical store.
//!
//! The coordinator owns the write path; everything here goes through one
//! rusqlite transaction per logical write, so a partial failure can never
//! leave orphan scene/chunk rows. The unique index on `content_sha256` is
//! the arbiter for concurrent ingests of identical content: the insert loser
//! rolls back, re-reads, and returns the winner's work id.

use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{FolioError, Result};
use crate::ingest::chunk::ChunkSpan;
use crate::ingest::normalize::fingerprint_text;
use crate::ingest::segment::SceneSpan;

/// Parameters recorded on each IngestRun.
#[derive(Debug, Clone, Serialize)]
pub struct RunParams {
    pub profile: String,
    pub window_chars: usize,
    pub stride_chars: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub invoked_by: String,
}

/// Result of attempting to persist a new work.
#[derive(Debug)]
pub enum PersistOutcome {
    Created { work_id: String, run_id: String },
    /// Another work with the same fingerprint already exists (or won the race).
    Duplicate { work_id: String },
}

/// Work metadata row, as served to callers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkSummary {
    pub work_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub char_count: usize,
    pub content_sha256: String,
    pub run_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneRow {
    pub scene_id: String,
    pub idx: usize,
    pub start: usize,
    pub end: usize,
    pub heading: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub scene_id: String,
    pub idx: usize,
    pub start: usize,
    pub end: usize,
}

fn is_fingerprint_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("content_sha256")
    )
}

fn params_json(run: &RunParams) -> Result<String> {
    serde_json::to_string(run)
        .map_err(|e| FolioError::Config(format!("run params serialization: {e}")))
}

/// Byte offset of every char index, plus the end-of-text offset, so chunk
/// slicing is O(1) per chunk instead of rescanning the text.
fn char_byte_index(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Look up an existing work id by content fingerprint.
pub async fn find_work_by_fingerprint(db: &Db, fingerprint: &str) -> Result<Option<String>> {
    let fingerprint = fingerprint.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT work_id FROM works WHERE content_sha256 = ?1")?;
        let mut rows = stmt.query([&fingerprint])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get::<_, String>(0)?));
        }
        Ok(None)
    })
    .await
}

/// Write run, work, scenes, and chunks in one transaction.
///
/// On a fingerprint uniqueness violation the transaction rolls back and the
/// existing work id is returned instead of an error.
#[allow(clippy::too_many_arguments)]
pub async fn persist_work(
    db: &Db,
    title: Option<String>,
    author: Option<String>,
    source: Option<String>,
    norm_text: String,
    char_count: usize,
    fingerprint: String,
    scenes: Vec<SceneSpan>,
    chunks: Vec<ChunkSpan>,
    run: RunParams,
) -> Result<PersistOutcome> {
    let run_json = params_json(&run)?;
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let run_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO ingest_runs (run_id, params_json) VALUES (?1, ?2)",
            params![run_id, run_json],
        )?;

        let work_id = Uuid::new_v4().to_string();
        let inserted = tx.execute(
            "INSERT INTO works (work_id, title, author, source, norm_text, char_count, content_sha256, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                work_id,
                title,
                author,
                source,
                norm_text,
                char_count as i64,
                fingerprint,
                run_id
            ],
        );
        if let Err(err) = inserted {
            if is_fingerprint_conflict(&err) {
                drop(tx); // rollback: the run row must not survive either
                let existing: String = conn.query_row(
                    "SELECT work_id FROM works WHERE content_sha256 = ?1",
                    [&fingerprint],
                    |row| row.get(0),
                )?;
                return Ok(PersistOutcome::Duplicate { work_id: existing });
            }
            return Err(err.into());
        }

        let scene_ids = insert_scenes(&tx, &work_id, &scenes)?;
        insert_chunks(&tx, &work_id, &scene_ids, &chunks, &norm_text)?;

        tx.commit()?;
        Ok(PersistOutcome::Created { work_id, run_id })
    })
    .await
}

/// Replace a work's scenes and chunks wholesale under a new run.
///
/// Returns `(scene_count, chunk_count, run_id)`.
pub async fn replace_segmentation(
    db: &Db,
    work_id: String,
    norm_text: String,
    scenes: Vec<SceneSpan>,
    chunks: Vec<ChunkSpan>,
    run: RunParams,
) -> Result<(usize, usize, String)> {
    let run_json = params_json(&run)?;
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let run_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO ingest_runs (run_id, params_json) VALUES (?1, ?2)",
            params![run_id, run_json],
        )?;

        // Old rows are superseded, not merged (CASCADE would drop chunks with
        // their scenes, but be explicit)
        tx.execute("DELETE FROM chunks WHERE work_id = ?1", params![work_id])?;
        tx.execute("DELETE FROM scenes WHERE work_id = ?1", params![work_id])?;

        let scene_ids = insert_scenes(&tx, &work_id, &scenes)?;
        insert_chunks(&tx, &work_id, &scene_ids, &chunks, &norm_text)?;

        let updated = tx.execute(
            "UPDATE works SET run_id = ?1 WHERE work_id = ?2",
            params![run_id, work_id],
        )?;
        if updated == 0 {
            return Err(FolioError::NotFound(work_id));
        }

        tx.commit()?;
        Ok((scenes.len(), chunks.len(), run_id))
    })
    .await
}

fn insert_scenes(
    tx: &rusqlite::Transaction<'_>,
    work_id: &str,
    scenes: &[SceneSpan],
) -> Result<Vec<String>> {
    let mut scene_ids = Vec::with_capacity(scenes.len());
    let mut stmt = tx.prepare(
        "INSERT INTO scenes (scene_id, work_id, idx, char_start, char_end, heading)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for scene in scenes {
        let scene_id = Uuid::new_v4().to_string();
        stmt.execute(params![
            scene_id,
            work_id,
            scene.idx as i64,
            scene.start as i64,
            scene.end as i64,
            scene.heading
        ])?;
        scene_ids.push(scene_id);
    }
    Ok(scene_ids)
}

fn insert_chunks(
    tx: &rusqlite::Transaction<'_>,
    work_id: &str,
    scene_ids: &[String],
    chunks: &[ChunkSpan],
    norm_text: &str,
) -> Result<()> {
    let byte_at = char_byte_index(norm_text);
    let mut stmt = tx.prepare(
        "INSERT INTO chunks (chunk_id, work_id, scene_id, idx, char_start, char_end, text, content_sha256)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for chunk in chunks {
        let text = &norm_text[byte_at[chunk.start]..byte_at[chunk.end]];
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            work_id,
            scene_ids[chunk.scene_idx],
            chunk.idx as i64,
            chunk.start as i64,
            chunk.end as i64,
            text,
            fingerprint_text(text)
        ])?;
    }
    Ok(())
}

/// Canonical text and char count for a work.
pub async fn load_work_text(db: &Db, work_id: &str) -> Result<Option<(String, usize)>> {
    let work_id = work_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt =
            conn.prepare("SELECT norm_text, char_count FROM works WHERE work_id = ?1")?;
        let mut rows = stmt.query([&work_id])?;
        if let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            let chars: i64 = row.get(1)?;
            return Ok(Some((text, chars as usize)));
        }
        Ok(None)
    })
    .await
}

/// Scene and chunk counts for a work.
pub async fn counts_for_work(db: &Db, work_id: &str) -> Result<(usize, usize)> {
    let work_id = work_id.to_string();
    db.with_connection(move |conn| {
        let scenes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scenes WHERE work_id = ?1",
            [&work_id],
            |row| row.get(0),
        )?;
        let chunks: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE work_id = ?1",
            [&work_id],
            |row| row.get(0),
        )?;
        Ok((scenes as usize, chunks as usize))
    })
    .await
}

/// Total IngestRun rows, for idempotency assertions and stats.
pub async fn run_count(db: &Db) -> Result<usize> {
    db.with_connection(|conn| {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM ingest_runs", [], |row| row.get(0))?;
        Ok(n as usize)
    })
    .await
}

fn work_summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkSummary> {
    Ok(WorkSummary {
        work_id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        source: row.get(3)?,
        char_count: row.get::<_, i64>(4)? as usize,
        content_sha256: row.get(5)?,
        run_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const WORK_COLUMNS: &str =
    "work_id, title, author, source, char_count, content_sha256, run_id, created_at";

/// Fetch one work's metadata.
pub async fn get_work(db: &Db, work_id: &str) -> Result<Option<WorkSummary>> {
    let work_id = work_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORK_COLUMNS} FROM works WHERE work_id = ?1"
        ))?;
        let mut rows = stmt.query([&work_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(work_summary_from_row(row)?));
        }
        Ok(None)
    })
    .await
}

/// List works, newest first, optionally filtered by a title substring.
pub async fn list_works(db: &Db, query: Option<String>, limit: usize) -> Result<Vec<WorkSummary>> {
    db.with_connection(move |conn| {
        let mut out = Vec::new();
        match query {
            Some(q) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_COLUMNS} FROM works WHERE title LIKE ?1
                     ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows =
                    stmt.query_map(params![format!("%{q}%"), limit as i64], work_summary_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_COLUMNS} FROM works ORDER BY created_at DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit as i64], work_summary_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    })
    .await
}

/// Scenes for a work, ordered by index.
pub async fn list_scenes(db: &Db, work_id: &str) -> Result<Vec<SceneRow>> {
    let work_id = work_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT scene_id, idx, char_start, char_end, heading
             FROM scenes WHERE work_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map([&work_id], |row| {
            Ok(SceneRow {
                scene_id: row.get(0)?,
                idx: row.get::<_, i64>(1)? as usize,
                start: row.get::<_, i64>(2)? as usize,
                end: row.get::<_, i64>(3)? as usize,
                heading: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Chunks for a work, ordered by index.
pub async fn list_chunks(db: &Db, work_id: &str) -> Result<Vec<ChunkRow>> {
    let work_id = work_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT chunk_id, scene_id, idx, char_start, char_end
             FROM chunks WHERE work_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map([&work_id], |row| {
            Ok(ChunkRow {
                chunk_id: row.get(0)?,
                scene_id: row.get(1)?,
                idx: row.get::<_, i64>(2)? as usize,
                start: row.get::<_, i64>(3)? as usize,
                end: row.get::<_, i64>(4)? as usize,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::ingest::normalize::{normalize, slice_by_chars};
    use crate::ingest::{chunk::make_chunks, segment::strategy_for};
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (db, temp_dir)
    }

    fn test_run() -> RunParams {
        RunParams {
            profile: "default".to_string(),
            window_chars: 512,
            stride_chars: 384,
            warnings: Vec::new(),
            invoked_by: "test".to_string(),
        }
    }

    async fn persist_sample(db: &Db, raw: &str) -> PersistOutcome {
        let norm = normalize(raw);
        let scenes = strategy_for(Some("default")).segment(&norm.text);
        let chunks = make_chunks(&scenes, 512, 384).unwrap();
        persist_work(
            db,
            Some("Sample".to_string()),
            None,
            Some("sample.txt".to_string()),
            norm.text.clone(),
            norm.char_count,
            norm.fingerprint.clone(),
            scenes,
            chunks,
            test_run(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_persist_creates_work_with_children() {
        let (db, _tmp) = setup_test_db().await;
        let outcome = persist_sample(&db, "CHAPTER I\nHello there friend\n\n\nWorld scene").await;
        let work_id = match outcome {
            PersistOutcome::Created { work_id, .. } => work_id,
            other => panic!("expected Created, got {other:?}"),
        };

        let (scenes, chunks) = counts_for_work(&db, &work_id).await.unwrap();
        assert!(scenes >= 2);
        assert!(chunks >= 1);
        assert_eq!(run_count(&db).await.unwrap(), 1);

        let summary = get_work(&db, &work_id).await.unwrap().unwrap();
        assert_eq!(summary.title.as_deref(), Some("Sample"));
        assert_eq!(summary.content_sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_returns_existing_id() {
        let (db, _tmp) = setup_test_db().await;
        let first = persist_sample(&db, "Some document body\n\n\nSecond scene here").await;
        let first_id = match first {
            PersistOutcome::Created { work_id, .. } => work_id,
            other => panic!("expected Created, got {other:?}"),
        };

        // Same canonical content straight into persist: the unique index on
        // content_sha256 resolves the collision to the winner's id.
        let second = persist_sample(&db, "Some document body\n\n\nSecond scene here").await;
        match second {
            PersistOutcome::Duplicate { work_id } => assert_eq!(work_id, first_id),
            other => panic!("expected Duplicate, got {other:?}"),
        }

        // The losing attempt rolled back entirely: one work, one run
        assert_eq!(run_count(&db).await.unwrap(), 1);
        let works = list_works(&db, None, 10).await.unwrap();
        assert_eq!(works.len(), 1);
    }

    #[tokio::test]
    async fn test_chunk_round_trip_from_db() {
        let (db, _tmp) = setup_test_db().await;
        let raw = "Héllo wörld, chapter text goes here.\n\n\nAnother scène with accents.";
        let outcome = persist_sample(&db, raw).await;
        let work_id = match outcome {
            PersistOutcome::Created { work_id, .. } => work_id,
            other => panic!("expected Created, got {other:?}"),
        };

        let (text, char_count) = load_work_text(&db, &work_id).await.unwrap().unwrap();
        let chunks = list_chunks(&db, &work_id).await.unwrap();
        assert!(!chunks.is_empty());

        let stored: Vec<(String, usize, usize)> = db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT text, char_start, char_end FROM chunks WHERE work_id = ?1 ORDER BY idx",
                )?;
                let rows = stmt.query_map([&work_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as usize,
                        row.get::<_, i64>(2)? as usize,
                    ))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .unwrap();

        for (chunk_text, start, end) in stored {
            assert!(end <= char_count);
            assert_eq!(chunk_text, slice_by_chars(&text, start, end));
        }
    }

    #[tokio::test]
    async fn test_replace_segmentation_supersedes_old_rows() {
        let (db, _tmp) = setup_test_db().await;
        let raw = "One paragraph of text.\n\nAnother paragraph.\n\nA third paragraph here.";
        let outcome = persist_sample(&db, raw).await;
        let work_id = match outcome {
            PersistOutcome::Created { work_id, run_id } => {
                let summary = get_work(&db, &work_id).await.unwrap().unwrap();
                assert_eq!(summary.run_id, run_id);
                work_id
            }
            other => panic!("expected Created, got {other:?}"),
        };

        let (text, _) = load_work_text(&db, &work_id).await.unwrap().unwrap();
        let scenes = strategy_for(Some("sparse")).segment(&text);
        let chunks = make_chunks(&scenes, 16, 8).unwrap();
        let new_scene_count = scenes.len();
        let new_chunk_count = chunks.len();

        let (s, c, new_run_id) = replace_segmentation(
            &db,
            work_id.clone(),
            text,
            scenes,
            chunks,
            RunParams {
                profile: "sparse".to_string(),
                window_chars: 16,
                stride_chars: 8,
                warnings: Vec::new(),
                invoked_by: "test".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!((s, c), (new_scene_count, new_chunk_count));
        assert_eq!(
            counts_for_work(&db, &work_id).await.unwrap(),
            (new_scene_count, new_chunk_count)
        );
        let summary = get_work(&db, &work_id).await.unwrap().unwrap();
        assert_eq!(summary.run_id, new_run_id);
        assert_eq!(run_count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_segmentation_unknown_work() {
        let (db, _tmp) = setup_test_db().await;
        let err = replace_segmentation(
            &db,
            "no-such-work".to_string(),
            String::new(),
            Vec::new(),
            Vec::new(),
            test_run(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FolioError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_works_filter() {
        let (db, _tmp) = setup_test_db().await;
        persist_sample(&db, "Body of the first document").await;

        let all = list_works(&db, None, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        let hit = list_works(&db, Some("Samp".to_string()), 10).await.unwrap();
        assert_eq!(hit.len(), 1);
        let miss = list_works(&db, Some("zzz".to_string()), 10).await.unwrap();
        assert!(miss.is_empty());
    }
}
