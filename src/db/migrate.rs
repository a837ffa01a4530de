use crate::error::{FolioError, Result};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;

/// Migration metadata
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(FolioError::Store)?;
    Ok(names)
}

/// Load migration files from migrations directory
fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();

    let entries = fs::read_dir(migrations_dir).map_err(FolioError::Io)?;

    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    for entry in files {
        let path = entry.path();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FolioError::Config("Invalid migration filename".to_string()))?;

        // Parse version from filename (e.g., "001_core_tables.sql" -> 1)
        let version_str = filename
            .split('_')
            .next()
            .ok_or_else(|| FolioError::Config(format!("Invalid migration filename: {filename}")))?;
        let version: u32 = version_str
            .parse()
            .map_err(|_| FolioError::Config(format!("Invalid migration version: {version_str}")))?;

        let sql = fs::read_to_string(&path).map_err(FolioError::Io)?;
        let name = filename.trim_end_matches(".sql").to_string();

        migrations.push(Migration { version, name, sql });
    }

    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;
    let migrations = load_migrations(migrations_dir)?;

    for migration in migrations {
        if applied.contains(&migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!(
            "Applying migration: {} (version {})",
            migration.name,
            migration.version
        );

        let tx = conn.transaction()?;

        // execute_batch handles multi-statement files, including trigger
        // bodies with embedded semicolons
        tx.execute_batch(&migration.sql).map_err(|e| {
            FolioError::Config(format!(
                "Failed to execute migration {}: {e}",
                migration.name
            ))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;

        tx.commit()?;

        log::info!("Migration {} applied successfully", migration.name);
    }

    log::debug!("All migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_migration_tracking() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let conn = Connection::open(&db_path).unwrap();

        ensure_migrations_table(&conn).unwrap();

        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![1, "001_test"],
        )
        .unwrap();

        let applied = get_applied_migrations(&conn).unwrap();
        assert!(applied.contains(&"001_test".to_string()));
    }

    #[test]
    fn test_load_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();

        fs::write(
            migrations_dir.join("001_test.sql"),
            "CREATE TABLE test (id INTEGER);",
        )
        .unwrap();
        fs::write(
            migrations_dir.join("002_another.sql"),
            "CREATE TABLE another (id INTEGER);",
        )
        .unwrap();

        let migrations = load_migrations(&migrations_dir).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn test_full_migration_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let mut conn = Connection::open(&db_path).unwrap();

        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        run_migrations(&mut conn, &migrations_dir).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap();

        assert!(tables.contains(&"works".to_string()));
        assert!(tables.contains(&"scenes".to_string()));
        assert!(tables.contains(&"chunks".to_string()));
        assert!(tables.contains(&"ingest_runs".to_string()));
        assert!(tables.contains(&"chunk_fts".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));

        // Re-running is a no-op
        run_migrations(&mut conn, &migrations_dir).unwrap();
        let applied = get_applied_migrations(&conn).unwrap();
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_unique_fingerprint_index() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let mut conn = Connection::open(&db_path).unwrap();
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        run_migrations(&mut conn, &migrations_dir).unwrap();

        conn.execute(
            "INSERT INTO ingest_runs (run_id, params_json) VALUES ('r1', '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO works (work_id, norm_text, char_count, content_sha256, run_id)
             VALUES ('w1', 'abc', 3, 'fp1', 'r1')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO works (work_id, norm_text, char_count, content_sha256, run_id)
             VALUES ('w2', 'abc', 3, 'fp1', 'r1')",
            [],
        );
        assert!(dup.is_err(), "duplicate fingerprint must violate uniqueness");
    }
}
