use circlevault_shared::error::VaultError;
use circlevault_shared::ids::CircleId;
use rusqlite::{params, Connection, OptionalExtension};

use super::now_millis;

#[derive(Debug, Clone)]
pub struct CircleRow {
    pub id: CircleId,
    pub name: String,
    pub created: i64,
}

pub fn insert(conn: &Connection, name: &str) -> Result<CircleId, VaultError> {
    let id = CircleId::new();
    conn.execute(
        "INSERT INTO circles (id, name, created) VALUES (?1, ?2, ?3)",
        params![id, name, now_millis()],
    )?;
    Ok(id)
}

pub fn find(conn: &Connection, id: CircleId) -> Result<Option<CircleRow>, VaultError> {
    Ok(conn
        .query_row(
            "SELECT id, name, created FROM circles WHERE id = ?1",
            [id],
            |row| {
                Ok(CircleRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn name_exists(conn: &Connection, name: &str) -> Result<bool, VaultError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM circles WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?)
}

/// Delete the circle; trustees and records cascade.
pub fn delete(conn: &Connection, id: CircleId) -> Result<bool, VaultError> {
    Ok(conn.execute("DELETE FROM circles WHERE id = ?1", [id])? > 0)
}
