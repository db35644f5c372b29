use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS documents (
    doc_id BLOB PRIMARY KEY CHECK (length(doc_id) = 16),
    doc_type TEXT NOT NULL,
    parent_id BLOB REFERENCES documents (doc_id) ON DELETE CASCADE,
    relation TEXT,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    CHECK ((parent_id IS NULL) = (relation IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents (parent_id, relation);
CREATE INDEX IF NOT EXISTS idx_documents_root ON documents (doc_type) WHERE parent_id IS NULL;

CREATE TABLE IF NOT EXISTS fields (
    doc_id BLOB NOT NULL REFERENCES documents (doc_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (doc_id, field_key)
);
";
