//! Schema migration runner with its own `_vault_migrations` version table.

use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS members (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    salt       TEXT NOT NULL,
    pbk        TEXT,
    pvk        TEXT,
    pbe_params TEXT,
    algorithm  TEXT,
    role       TEXT NOT NULL CHECK (role IN ('ADMIN', 'STANDARD')),
    created    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS circles (
    id      TEXT PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE,
    created INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS keys (
    id           TEXT PRIMARY KEY,
    algorithm    TEXT NOT NULL,
    cipher_mode  TEXT NOT NULL,
    padding      TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('GENERATED', 'DEPRECATED')),
    expires      INTEGER,
    grace_period INTEGER,
    created      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS trustees (
    id          TEXT PRIMARY KEY,
    member_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
    circle_id   TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
    key_id      TEXT NOT NULL REFERENCES keys(id),
    trust_level TEXT NOT NULL CHECK (trust_level IN ('READ', 'WRITE', 'ADMIN')),
    circle_key  TEXT NOT NULL,
    created     INTEGER NOT NULL,
    changed     INTEGER NOT NULL,
    UNIQUE (member_id, circle_id)
);

CREATE TABLE IF NOT EXISTS data (
    id             TEXT PRIMARY KEY,
    circle_id      TEXT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
    key_id         TEXT NOT NULL REFERENCES keys(id),
    name           TEXT NOT NULL,
    initial_vector TEXT NOT NULL,
    data           BLOB NOT NULL,
    checksum       TEXT NOT NULL,
    sanity_status  TEXT NOT NULL DEFAULT 'OK' CHECK (sanity_status IN ('OK', 'FAILED')),
    sanity_checked INTEGER,
    created        INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trustees_circle ON trustees (circle_id);
CREATE INDEX IF NOT EXISTS idx_data_circle ON data (circle_id);
CREATE INDEX IF NOT EXISTS idx_data_sanity ON data (sanity_status, sanity_checked);

CREATE TABLE IF NOT EXISTS settings (
    name  TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _vault_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _vault_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _vault_migrations (version) VALUES (?1)",
                [version],
            )?;
            tx.commit()?;
            tracing::info!(version, "applied vault migration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn run_migrations_creates_all_vault_tables() {
        let conn = init_test_db();
        let expected = ["members", "circles", "keys", "trustees", "data", "settings"];
        for table in &expected {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "table {table} should exist");
        }
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = init_test_db();
        let count_before: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        run_migrations(&conn).unwrap();

        let count_after: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count_before, count_after);
    }

    #[test]
    fn migrations_table_tracks_version() {
        let conn = init_test_db();
        let applied_at: String = conn
            .query_row(
                "SELECT applied_at FROM _vault_migrations WHERE version = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!applied_at.is_empty());
    }

    #[test]
    fn trust_level_check_constraint_rejects_unknown_level() {
        let conn = init_test_db();
        conn.execute_batch(
            "INSERT INTO members (id, name, salt, role, created) VALUES ('m1', 'alice', 's', 'STANDARD', 0);
             INSERT INTO circles (id, name, created) VALUES ('c1', 'circle', 0);
             INSERT INTO keys (id, algorithm, cipher_mode, padding, status, created)
                 VALUES ('k1', 'AES_256', 'GCM', 'NoPadding', 'GENERATED', 0);",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO trustees (id, member_id, circle_id, key_id, trust_level, circle_key, created, changed)
             VALUES ('t1', 'm1', 'c1', 'k1', 'OWNER', 'x', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn trustee_pair_is_unique() {
        let conn = init_test_db();
        conn.execute_batch(
            "INSERT INTO members (id, name, salt, role, created) VALUES ('m1', 'alice', 's', 'STANDARD', 0);
             INSERT INTO circles (id, name, created) VALUES ('c1', 'circle', 0);
             INSERT INTO keys (id, algorithm, cipher_mode, padding, status, created)
                 VALUES ('k1', 'AES_256', 'GCM', 'NoPadding', 'GENERATED', 0);
             INSERT INTO trustees (id, member_id, circle_id, key_id, trust_level, circle_key, created, changed)
                 VALUES ('t1', 'm1', 'c1', 'k1', 'READ', 'x', 0, 0);",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO trustees (id, member_id, circle_id, key_id, trust_level, circle_key, created, changed)
             VALUES ('t2', 'm1', 'c1', 'k1', 'WRITE', 'y', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
