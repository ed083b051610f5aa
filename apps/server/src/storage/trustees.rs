use circlevault_shared::error::VaultError;
use circlevault_shared::ids::{CircleId, KeyId, MemberId, TrusteeId};
use circlevault_shared::model::TrustLevel;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::now_millis;

/// A `trustees` row: one member's grant in one circle, with that member's
/// own wrapped copy of the circle key.
#[derive(Debug, Clone)]
pub struct TrusteeRow {
    pub id: TrusteeId,
    pub member_id: MemberId,
    pub circle_id: CircleId,
    pub key_id: KeyId,
    pub trust_level: TrustLevel,
    pub circle_key: String,
    pub created: i64,
    pub changed: i64,
}

const COLUMNS: &str = "id, member_id, circle_id, key_id, trust_level, circle_key, created, changed";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TrusteeRow> {
    Ok(TrusteeRow {
        id: row.get(0)?,
        member_id: row.get(1)?,
        circle_id: row.get(2)?,
        key_id: row.get(3)?,
        trust_level: row.get(4)?,
        circle_key: row.get(5)?,
        created: row.get(6)?,
        changed: row.get(7)?,
    })
}

pub fn insert(
    conn: &Connection,
    member_id: MemberId,
    circle_id: CircleId,
    key_id: KeyId,
    trust_level: TrustLevel,
    circle_key: &str,
) -> Result<TrusteeId, VaultError> {
    let id = TrusteeId::new();
    let now = now_millis();
    conn.execute(
        "INSERT INTO trustees (id, member_id, circle_id, key_id, trust_level, circle_key, created, changed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, member_id, circle_id, key_id, trust_level, circle_key, now],
    )?;
    Ok(id)
}

pub fn find(
    conn: &Connection,
    member_id: MemberId,
    circle_id: CircleId,
) -> Result<Option<TrusteeRow>, VaultError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM trustees WHERE member_id = ?1 AND circle_id = ?2"),
            params![member_id, circle_id],
            from_row,
        )
        .optional()?)
}

pub fn list_for_circle(conn: &Connection, circle_id: CircleId) -> Result<Vec<TrusteeRow>, VaultError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM trustees WHERE circle_id = ?1 ORDER BY created, id"
    ))?;
    let rows = stmt.query_map([circle_id], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Circles in which the member holds at least `level`.
pub fn circles_with_level(
    conn: &Connection,
    member_id: MemberId,
    level: TrustLevel,
) -> Result<Vec<CircleId>, VaultError> {
    let mut stmt =
        conn.prepare("SELECT circle_id, trust_level FROM trustees WHERE member_id = ?1")?;
    let rows = stmt.query_map([member_id], |row| {
        Ok((row.get::<_, CircleId>(0)?, row.get::<_, TrustLevel>(1)?))
    })?;
    let mut circles = Vec::new();
    for row in rows {
        let (circle_id, trust_level) = row?;
        if trust_level.allows(level) {
            circles.push(circle_id);
        }
    }
    Ok(circles)
}

/// Circles whose only trustee is `member_id`.
pub fn circles_with_sole_trustee(
    conn: &Connection,
    member_id: MemberId,
) -> Result<Vec<CircleId>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT t.circle_id FROM trustees t
         WHERE t.member_id = ?1
           AND (SELECT COUNT(*) FROM trustees o WHERE o.circle_id = t.circle_id) = 1",
    )?;
    let rows = stmt.query_map([member_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Circles in which the member is the only ADMIN trustee.
pub fn circles_where_last_admin(
    conn: &Connection,
    member_id: MemberId,
) -> Result<Vec<CircleId>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT t.circle_id FROM trustees t
         WHERE t.member_id = ?1 AND t.trust_level = ?2
           AND (SELECT COUNT(*) FROM trustees o
                WHERE o.circle_id = t.circle_id AND o.trust_level = ?2) = 1",
    )?;
    let rows = stmt.query_map(params![member_id, TrustLevel::Admin], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn count_for_circle(conn: &Connection, circle_id: CircleId) -> Result<i64, VaultError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM trustees WHERE circle_id = ?1",
        [circle_id],
        |row| row.get(0),
    )?)
}

/// Change only the trust level; the wrapped key is left as is.
pub fn update_level(conn: &Connection, id: TrusteeId, level: TrustLevel) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE trustees SET trust_level = ?2, changed = ?3 WHERE id = ?1",
        params![id, level, now_millis()],
    )?;
    Ok(())
}

/// Replace the wrapped copy, after a rotation or a re-add.
pub fn update_key(
    conn: &Connection,
    id: TrusteeId,
    key_id: KeyId,
    circle_key: &str,
    level: TrustLevel,
) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE trustees SET key_id = ?2, circle_key = ?3, trust_level = ?4, changed = ?5
         WHERE id = ?1",
        params![id, key_id, circle_key, level, now_millis()],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: TrusteeId) -> Result<bool, VaultError> {
    Ok(conn.execute("DELETE FROM trustees WHERE id = ?1", [id])? > 0)
}
