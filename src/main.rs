use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio::config::Config;
use folio::db::{migrate, Db};
use folio::error::FolioError;
use folio::events::EventEmitter;
use folio::ingest::{store, IngestRequest, Ingestor, PROFILE_NAMES};
use folio::watch::FolderWatcher;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Deterministic long-form document ingestion")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Port override (defaults to http_server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ingest a single file
    Ingest {
        path: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Segmentation profile (default|dense|sparse|markdown|screenplay|pdf_pages)
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        window_chars: Option<usize>,
        #[arg(long)]
        stride_chars: Option<usize>,
    },
    /// Re-derive scenes and chunks for an existing work
    Resegment {
        work_id: String,
        #[arg(long, default_value = "default")]
        profile: String,
        #[arg(long, default_value = "512")]
        window_chars: usize,
        #[arg(long, default_value = "384")]
        stride_chars: usize,
    },
    /// Print an exact substring of a work's canonical text
    Slice {
        work_id: String,
        start: usize,
        end: usize,
    },
    /// Watch the inbox folder and ingest dropped files
    Watch {
        /// Segmentation profile for watched files
        #[arg(long)]
        profile: Option<String>,
    },
    /// Verify the database schema (default command)
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;

    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir))
        .await?;

    match args.command.unwrap_or(Command::Verify) {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.http_server.port);
            let ingestor = build_ingestor(db, &config);
            folio::api::serve(ingestor, port).await?;
        }
        Command::Ingest {
            path,
            title,
            author,
            profile,
            window_chars,
            stride_chars,
        } => {
            let ingestor = build_ingestor(db, &config);
            let outcome = ingestor
                .ingest(IngestRequest {
                    path,
                    title,
                    author,
                    profile,
                    window_chars,
                    stride_chars,
                    invoked_by: "cli".to_string(),
                })
                .await?;
            println!(
                "work_id={} sha256={} chars={} scenes={} chunks={}{}",
                outcome.work_id,
                outcome.content_sha256,
                outcome.char_count,
                outcome.scene_count,
                outcome.chunk_count,
                if outcome.deduplicated {
                    " (existing work, nothing written)"
                } else {
                    ""
                }
            );
        }
        Command::Resegment {
            work_id,
            profile,
            window_chars,
            stride_chars,
        } => {
            let ingestor = build_ingestor(db, &config);
            let outcome = ingestor
                .resegment(&work_id, &profile, window_chars, stride_chars)
                .await?;
            println!(
                "run_id={} scenes={} chunks={}",
                outcome.run_id, outcome.scene_count, outcome.chunk_count
            );
        }
        Command::Slice {
            work_id,
            start,
            end,
        } => {
            let ingestor = build_ingestor(db, &config);
            print!("{}", ingestor.slice(&work_id, start, end).await?);
        }
        Command::Watch { profile } => {
            let mut watcher_cfg = config.watcher.clone();
            if profile.is_some() {
                watcher_cfg.profile = profile;
            }
            let ingestor = build_ingestor(db, &config);
            let watcher = FolderWatcher::new(watcher_cfg, ingestor);

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("received Ctrl+C, shutting down");
                    let _ = shutdown_tx.send(true);
                }
            });

            log::info!("watching for files (Ctrl+C to stop)");
            watcher.run(shutdown_rx).await?;
        }
        Command::Verify => {
            verify_schema(&db).await?;
        }
    }

    Ok(())
}

fn build_ingestor(db: Db, config: &Config) -> Arc<Ingestor> {
    let emitter = EventEmitter::from_config(&config.events);
    Arc::new(Ingestor::new(db, emitter, config.ingest.clone()))
}

/// Verify that all expected database objects exist
async fn verify_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for table in ["works", "scenes", "chunks", "ingest_runs", "chunk_fts", "schema_migrations"]
        {
            if !tables.iter().any(|t| t == table) {
                return Err(FolioError::Config(format!("Missing table: {table}")));
            }
            log::debug!("✓ Table exists: {table}");
        }

        let unique_index: bool = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='index' AND name='uniq_works_content_sha256'",
            )?
            .exists([])?;
        if !unique_index {
            return Err(FolioError::Config(
                "Missing unique fingerprint index uniq_works_content_sha256".to_string(),
            ));
        }
        log::debug!("✓ Unique fingerprint index exists");

        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='trigger' ORDER BY name")?;
        let triggers: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        for trigger in ["chunk_fts_insert", "chunk_fts_delete", "chunk_fts_update"] {
            if !triggers.iter().any(|t| t == trigger) {
                return Err(FolioError::Config(format!("Missing trigger: {trigger}")));
            }
            log::debug!("✓ Trigger exists: {trigger}");
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(FolioError::Config(format!(
                "Journal mode is not WAL: {journal_mode}"
            )));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(FolioError::Config(format!(
                "Database integrity check failed: {integrity}"
            )));
        }

        Ok(())
    })
    .await?;

    let work_count = store::list_works(db, None, 500).await?.len();
    log::info!("✓ Schema verification complete ({work_count} works, profiles: {PROFILE_NAMES:?})");
    Ok(())
}
