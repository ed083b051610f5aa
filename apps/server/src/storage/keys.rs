use circlevault_crypto::Algorithm;
use circlevault_shared::error::VaultError;
use circlevault_shared::ids::KeyId;
use circlevault_shared::model::KeyStatus;
use rusqlite::{params, Connection, OptionalExtension};

use super::now_millis;

/// Descriptor of a circle key. The key itself is never stored here.
#[derive(Debug, Clone)]
pub struct KeyRow {
    pub id: KeyId,
    pub algorithm: Algorithm,
    pub cipher_mode: String,
    pub padding: String,
    pub status: KeyStatus,
    pub expires: Option<i64>,
    pub grace_period: Option<i64>,
    pub created: i64,
}

pub fn insert(conn: &Connection, algorithm: Algorithm) -> Result<KeyId, VaultError> {
    let id = KeyId::new();
    conn.execute(
        "INSERT INTO keys (id, algorithm, cipher_mode, padding, status, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            algorithm.name(),
            algorithm.cipher_mode(),
            algorithm.padding(),
            KeyStatus::Generated,
            now_millis(),
        ],
    )?;
    Ok(id)
}

pub fn find(conn: &Connection, id: KeyId) -> Result<Option<KeyRow>, VaultError> {
    let row = conn
        .query_row(
            "SELECT id, algorithm, cipher_mode, padding, status, expires, grace_period, created
             FROM keys WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, KeyId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, KeyStatus>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((id, algorithm, cipher_mode, padding, status, expires, grace_period, created)) = row
    else {
        return Ok(None);
    };
    Ok(Some(KeyRow {
        id,
        algorithm: Algorithm::resolve(&algorithm)?,
        cipher_mode,
        padding,
        status,
        expires,
        grace_period,
        created,
    }))
}

pub fn set_status(conn: &Connection, id: KeyId, status: KeyStatus) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE keys SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(())
}
