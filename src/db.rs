use rusqlite::{Connection, Result as SqlResult};

/// Initialize the canonical table, its FTS5 shadow index, and the small
/// metadata table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> SqlResult<()> {
    create_memory_entries_table(conn)?;
    create_fts_index(conn)?;
    create_memory_meta_table(conn)?;
    Ok(())
}

fn create_memory_entries_table(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_entries (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            kind         TEXT NOT NULL,
            scope_key    TEXT NOT NULL,
            text         TEXT NOT NULL,
            norm_text    TEXT NOT NULL,
            channel      TEXT NOT NULL,
            chat_id      TEXT,
            sender_id    TEXT,
            importance   REAL NOT NULL,
            confidence   REAL NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            hit_count    INTEGER NOT NULL DEFAULT 0,
            source       TEXT NOT NULL,
            expires_at   TEXT NOT NULL,
            UNIQUE(scope_key, kind, norm_text)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_scope
            ON memory_entries(scope_key);
        CREATE INDEX IF NOT EXISTS idx_memory_expires
            ON memory_entries(expires_at);",
    )
}

/// FTS5 virtual table over `text`. `content=''` makes this an external-content
/// table — we sync it manually on every write, same technique the teacher
/// uses for `user_memory_fts`.
fn create_fts_index(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_entries_fts
            USING fts5(text, content='memory_entries', content_rowid='id');",
    )
}

fn create_memory_meta_table(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

/// Insert a row into the FTS shadow index for a freshly-inserted canonical row.
pub fn fts_insert(conn: &Connection, id: i64, text: &str) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO memory_entries_fts(rowid, text) VALUES(?1, ?2)",
        rusqlite::params![id, text],
    )?;
    Ok(())
}

/// Remove the FTS shadow row for a canonical row about to be deleted.
pub fn fts_delete(conn: &Connection, id: i64, text: &str) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO memory_entries_fts(memory_entries_fts, rowid, text) VALUES('delete', ?1, ?2)",
        rusqlite::params![id, text],
    )?;
    Ok(())
}
