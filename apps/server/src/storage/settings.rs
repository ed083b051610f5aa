use circlevault_shared::error::VaultError;
use rusqlite::{params, Connection};

/// Persisted setting overrides, in name order.
pub fn load_all(conn: &Connection) -> Result<Vec<(String, String)>, VaultError> {
    let mut stmt = conn.prepare("SELECT name, value FROM settings ORDER BY name")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn upsert(conn: &Connection, name: &str, value: &str) -> Result<(), VaultError> {
    conn.execute(
        "INSERT INTO settings (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}
