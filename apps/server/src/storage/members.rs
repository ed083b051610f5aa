use circlevault_shared::error::VaultError;
use circlevault_shared::ids::MemberId;
use circlevault_shared::model::MemberRole;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::now_millis;

/// A `members` row. `salt` is MasterKey-sealed; `pbk`/`pvk` are armored and
/// absent until the account's key pair exists.
#[derive(Debug, Clone)]
pub struct MemberRow {
    pub id: MemberId,
    pub name: String,
    pub salt: String,
    pub pbk: Option<String>,
    pub pvk: Option<String>,
    pub pbe_params: Option<String>,
    pub algorithm: Option<String>,
    pub role: MemberRole,
    pub created: i64,
}

/// Armored key material written together.
pub struct MemberKeys<'a> {
    pub pbk: &'a str,
    pub pvk: &'a str,
    pub pbe_params: &'a str,
    pub algorithm: &'a str,
}

const COLUMNS: &str = "id, name, salt, pbk, pvk, pbe_params, algorithm, role, created";

fn from_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        name: row.get(1)?,
        salt: row.get(2)?,
        pbk: row.get(3)?,
        pvk: row.get(4)?,
        pbe_params: row.get(5)?,
        algorithm: row.get(6)?,
        role: row.get(7)?,
        created: row.get(8)?,
    })
}

pub fn insert(
    conn: &Connection,
    name: &str,
    sealed_salt: &str,
    role: MemberRole,
    keys: Option<&MemberKeys<'_>>,
) -> Result<MemberId, VaultError> {
    let id = MemberId::new();
    conn.execute(
        "INSERT INTO members (id, name, salt, pbk, pvk, pbe_params, algorithm, role, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            name,
            sealed_salt,
            keys.map(|k| k.pbk),
            keys.map(|k| k.pvk),
            keys.map(|k| k.pbe_params),
            keys.map(|k| k.algorithm),
            role,
            now_millis(),
        ],
    )?;
    Ok(id)
}

pub fn find(conn: &Connection, id: MemberId) -> Result<Option<MemberRow>, VaultError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM members WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<MemberRow>, VaultError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM members WHERE name = ?1"),
            [name],
            from_row,
        )
        .optional()?)
}

pub fn name_exists(conn: &Connection, name: &str) -> Result<bool, VaultError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM members WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?)
}

pub fn list_all(conn: &Connection) -> Result<Vec<MemberRow>, VaultError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM members ORDER BY id"))?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn count(conn: &Connection) -> Result<i64, VaultError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?)
}

/// Store a key pair. Also used when a password change re-encrypts the private key.
pub fn update_keys(
    conn: &Connection,
    id: MemberId,
    sealed_salt: &str,
    keys: &MemberKeys<'_>,
) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE members SET salt = ?2, pbk = ?3, pvk = ?4, pbe_params = ?5, algorithm = ?6
         WHERE id = ?1",
        params![id, sealed_salt, keys.pbk, keys.pvk, keys.pbe_params, keys.algorithm],
    )?;
    Ok(())
}

/// Store the first key pair of an account created without one. Returns
/// false if a key pair was already stored.
pub fn set_initial_keys(
    conn: &Connection,
    id: MemberId,
    sealed_salt: &str,
    keys: &MemberKeys<'_>,
) -> Result<bool, VaultError> {
    let updated = conn.execute(
        "UPDATE members SET salt = ?2, pbk = ?3, pvk = ?4, pbe_params = ?5, algorithm = ?6
         WHERE id = ?1 AND pvk IS NULL",
        params![id, sealed_salt, keys.pbk, keys.pvk, keys.pbe_params, keys.algorithm],
    )?;
    Ok(updated > 0)
}

pub fn update_salt(conn: &Connection, id: MemberId, sealed_salt: &str) -> Result<(), VaultError> {
    conn.execute(
        "UPDATE members SET salt = ?2 WHERE id = ?1",
        params![id, sealed_salt],
    )?;
    Ok(())
}

/// Delete the member; trustee rows go with it through the foreign key cascade.
pub fn delete(conn: &Connection, id: MemberId) -> Result<bool, VaultError> {
    Ok(conn.execute("DELETE FROM members WHERE id = ?1", [id])? > 0)
}
