pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod watch;

pub use config::Config;
pub use error::{FolioError, Result};
pub use ingest::{IngestOutcome, IngestRequest, Ingestor, ResegmentOutcome};
pub use watch::FolderWatcher;
