use circlevault_shared::error::VaultError;
use circlevault_shared::ids::{CircleId, DataId, KeyId};
use circlevault_shared::model::SanityStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::now_millis;

/// A `data` row. `initial_vector` is MasterKey-sealed, `checksum` is the
/// armored digest of `data`.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub id: DataId,
    pub circle_id: CircleId,
    pub key_id: KeyId,
    pub name: String,
    pub initial_vector: String,
    pub data: Vec<u8>,
    pub checksum: String,
    pub sanity_status: SanityStatus,
    pub sanity_checked: Option<i64>,
    pub created: i64,
}

/// Columns a record is encrypted into.
pub struct EncryptedPayload<'a> {
    pub key_id: KeyId,
    pub initial_vector: &'a str,
    pub data: &'a [u8],
    pub checksum: &'a str,
}

/// What a sanity check needs: ciphertext and checksum, never key material.
#[derive(Debug, Clone)]
pub struct SanityCandidate {
    pub id: DataId,
    pub data: Vec<u8>,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct RecordSummary {
    pub id: DataId,
    pub circle_id: CircleId,
    pub name: String,
    pub sanity_status: SanityStatus,
    pub sanity_checked: Option<i64>,
    pub created: i64,
}

const COLUMNS: &str = "id, circle_id, key_id, name, initial_vector, data, checksum, \
                       sanity_status, sanity_checked, created";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DataRow> {
    Ok(DataRow {
        id: row.get(0)?,
        circle_id: row.get(1)?,
        key_id: row.get(2)?,
        name: row.get(3)?,
        initial_vector: row.get(4)?,
        data: row.get(5)?,
        checksum: row.get(6)?,
        sanity_status: row.get(7)?,
        sanity_checked: row.get(8)?,
        created: row.get(9)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<RecordSummary> {
    Ok(RecordSummary {
        id: row.get(0)?,
        circle_id: row.get(1)?,
        name: row.get(2)?,
        sanity_status: row.get(3)?,
        sanity_checked: row.get(4)?,
        created: row.get(5)?,
    })
}

pub fn insert(
    conn: &Connection,
    circle_id: CircleId,
    name: &str,
    payload: &EncryptedPayload<'_>,
) -> Result<DataId, VaultError> {
    let id = DataId::new();
    let now = now_millis();
    conn.execute(
        "INSERT INTO data (id, circle_id, key_id, name, initial_vector, data, checksum,
                           sanity_status, sanity_checked, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            circle_id,
            payload.key_id,
            name,
            payload.initial_vector,
            payload.data,
            payload.checksum,
            SanityStatus::Ok,
            now,
        ],
    )?;
    Ok(id)
}

pub fn find(conn: &Connection, id: DataId) -> Result<Option<DataRow>, VaultError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM data WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn list_for_circle(conn: &Connection, circle_id: CircleId) -> Result<Vec<DataRow>, VaultError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM data WHERE circle_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map([circle_id], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn summaries_for_circle(
    conn: &Connection,
    circle_id: CircleId,
) -> Result<Vec<RecordSummary>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, circle_id, name, sanity_status, sanity_checked, created
         FROM data WHERE circle_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([circle_id], summary_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Replace the ciphertext of a record, as done by key rotation. The sanity
/// status is left untouched.
pub fn update_payload(
    conn: &Connection,
    id: DataId,
    payload: &EncryptedPayload<'_>,
) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE data SET key_id = ?2, initial_vector = ?3, data = ?4, checksum = ?5 WHERE id = ?1",
        params![
            id,
            payload.key_id,
            payload.initial_vector,
            payload.data,
            payload.checksum,
        ],
    )?;
    Ok(())
}

/// Record a sanity result. Only OK records are updated, so a FAILED flag is
/// never cleared, even by a scan working from a stale candidate list.
/// Returns false if the record was already FAILED or is gone.
pub fn set_sanity(
    conn: &Connection,
    id: DataId,
    status: SanityStatus,
    checked: i64,
) -> Result<bool, VaultError> {
    let updated = conn.execute(
        "UPDATE data SET sanity_status = ?2, sanity_checked = ?3
         WHERE id = ?1 AND sanity_status = ?4",
        params![id, status, checked, SanityStatus::Ok],
    )?;
    Ok(updated > 0)
}

pub fn delete(conn: &Connection, id: DataId) -> Result<bool, VaultError> {
    Ok(conn.execute("DELETE FROM data WHERE id = ?1", [id])? > 0)
}

/// OK records not checked since `cutoff`, least recently checked first.
pub fn due_for_check(
    conn: &Connection,
    cutoff: i64,
    limit: u32,
) -> Result<Vec<SanityCandidate>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, data, checksum FROM data
         WHERE sanity_status = 'OK' AND (sanity_checked IS NULL OR sanity_checked < ?1)
         ORDER BY sanity_checked, id
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![cutoff, limit], |row| {
        Ok(SanityCandidate {
            id: row.get(0)?,
            data: row.get(1)?,
            checksum: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// OK records with an id greater than `after`, in id order. Drives full scans.
pub fn ok_after(
    conn: &Connection,
    after: Option<DataId>,
    limit: u32,
) -> Result<Vec<SanityCandidate>, VaultError> {
    let after = after.map(|id| id.to_string()).unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT id, data, checksum FROM data
         WHERE sanity_status = 'OK' AND id > ?1
         ORDER BY id
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![after, limit], |row| {
        Ok(SanityCandidate {
            id: row.get(0)?,
            data: row.get(1)?,
            checksum: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// FAILED records, optionally limited to one circle, flagged at or after `since`.
pub fn failures(
    conn: &Connection,
    circle_id: Option<CircleId>,
    since: i64,
) -> Result<Vec<RecordSummary>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, circle_id, name, sanity_status, sanity_checked, created
         FROM data
         WHERE sanity_status = 'FAILED'
           AND (?1 IS NULL OR circle_id = ?1)
           AND COALESCE(sanity_checked, created) >= ?2
         ORDER BY sanity_checked, id",
    )?;
    let rows = stmt.query_map(params![circle_id, since], summary_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Every sealed IV, for re-sealing under a new MasterKey.
pub fn all_initial_vectors(conn: &Connection) -> Result<Vec<(DataId, String)>, VaultError> {
    let mut stmt = conn.prepare("SELECT id, initial_vector FROM data ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn update_initial_vector(conn: &Connection, id: DataId, sealed: &str) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE data SET initial_vector = ?2 WHERE id = ?1",
        params![id, sealed],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{circles, keys, Store};
    use circlevault_crypto::Algorithm;

    fn seed(conn: &Connection) -> Result<(CircleId, KeyId), VaultError> {
        Ok((circles::insert(conn, "circle")?, keys::insert(conn, Algorithm::Aes256)?))
    }

    fn payload(key_id: KeyId) -> EncryptedPayload<'static> {
        EncryptedPayload {
            key_id,
            initial_vector: "iv",
            data: b"ciphertext",
            checksum: "sum",
        }
    }

    #[test]
    fn due_for_check_skips_failed_and_recent_records() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let (circle, key) = seed(conn)?;
                let old = insert(conn, circle, "old", &payload(key))?;
                let failed = insert(conn, circle, "failed", &payload(key))?;
                let fresh = insert(conn, circle, "fresh", &payload(key))?;
                set_sanity(conn, old, SanityStatus::Ok, 10)?;
                set_sanity(conn, failed, SanityStatus::Failed, 10)?;
                set_sanity(conn, fresh, SanityStatus::Ok, 1_000)?;

                let due = due_for_check(conn, 500, 10)?;
                let ids: Vec<DataId> = due.iter().map(|c| c.id).collect();
                assert_eq!(ids, vec![old]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn ok_after_pages_by_id() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let (circle, key) = seed(conn)?;
                let a = insert(conn, circle, "a", &payload(key))?;
                let b = insert(conn, circle, "b", &payload(key))?;

                let first = ok_after(conn, None, 1)?;
                assert_eq!(first[0].id, a);
                let second = ok_after(conn, Some(a), 1)?;
                assert_eq!(second[0].id, b);
                assert!(ok_after(conn, Some(b), 1)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failures_filter_by_circle_and_since() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let (circle, key) = seed(conn)?;
                let other = circles::insert(conn, "other")?;
                let early = insert(conn, circle, "early", &payload(key))?;
                let late = insert(conn, circle, "late", &payload(key))?;
                let elsewhere = insert(conn, other, "elsewhere", &payload(key))?;
                set_sanity(conn, early, SanityStatus::Failed, 100)?;
                set_sanity(conn, late, SanityStatus::Failed, 200)?;
                set_sanity(conn, elsewhere, SanityStatus::Failed, 200)?;

                assert_eq!(failures(conn, None, 0)?.len(), 3);
                let in_circle = failures(conn, Some(circle), 150)?;
                assert_eq!(in_circle.len(), 1);
                assert_eq!(in_circle[0].id, late);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failed_flag_is_never_cleared() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let (circle, key) = seed(conn)?;
                let id = insert(conn, circle, "flagged", &payload(key))?;
                assert!(set_sanity(conn, id, SanityStatus::Failed, 100)?);

                assert!(!set_sanity(conn, id, SanityStatus::Ok, 200)?);
                assert!(!set_sanity(conn, id, SanityStatus::Failed, 300)?);
                let row = find(conn, id)?.unwrap();
                assert_eq!(row.sanity_status, SanityStatus::Failed);
                assert_eq!(row.sanity_checked, Some(100));
                Ok(())
            })
            .unwrap();
    }
}
