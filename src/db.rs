use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "asistencia.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            last_seen_at TEXT
        )",
        [],
    )?;

    // UNIQUE(tenant_id, numero_control) closes the duplicate-registration
    // race at the storage layer; handlers still pre-check for the friendly
    // error.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            numero_control TEXT NOT NULL,
            nombre TEXT NOT NULL,
            grupo TEXT NOT NULL,
            semestre INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(tenant_id, numero_control)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_tenant ON students(tenant_id)",
        [],
    )?;

    // Append-only check-in log. No foreign key to students: an event may
    // reference a control number that was never registered.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            numero_control TEXT NOT NULL,
            materia TEXT NOT NULL,
            hora_clase TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_tenant ON attendance(tenant_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_tenant_class
         ON attendance(tenant_id, materia, hora_clase)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Stable per-workspace id, minted on first open. Forms the first half of
/// the tenant partition key.
pub fn installation_id(conn: &Connection) -> anyhow::Result<String> {
    if let Some(v) = settings_get_json(conn, "installation_id")? {
        if let Some(s) = v.as_str() {
            return Ok(s.to_string());
        }
    }
    let id = Uuid::new_v4().to_string();
    settings_set_json(conn, "installation_id", &serde_json::Value::String(id.clone()))?;
    Ok(id)
}
