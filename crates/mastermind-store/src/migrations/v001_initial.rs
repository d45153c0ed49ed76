//! v001 -- Initial schema creation.
//!
//! Prices are stored as integral lamports.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    address    TEXT PRIMARY KEY NOT NULL,     -- base58 wallet address
    username   TEXT,                          -- set once
    created_at TEXT NOT NULL                  -- RFC-3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username
    ON users(username COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id                       TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name                     TEXT NOT NULL,
    owner_address            TEXT NOT NULL,
    join_price_lamports      INTEGER NOT NULL,
    payment_address          TEXT NOT NULL,
    description              TEXT,
    background_image         TEXT,
    category                 TEXT NOT NULL,
    create_payment_signature TEXT NOT NULL,
    created_at               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_groups_category ON groups(category);

-- ----------------------------------------------------------------
-- Members (hard-deleted on leave)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS members (
    group_id                 TEXT NOT NULL,
    user_address             TEXT NOT NULL,
    join_price_paid_lamports INTEGER NOT NULL,
    joined_at                TEXT NOT NULL,

    PRIMARY KEY (group_id, user_address),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    group_id       TEXT NOT NULL,
    sender_address TEXT NOT NULL,
    username       TEXT,
    content        TEXT NOT NULL,
    created_at     TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_group_ts
    ON messages(group_id, created_at);

-- ----------------------------------------------------------------
-- Spent payment signatures
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS payment_signatures (
    signature TEXT PRIMARY KEY NOT NULL,  -- canonical base58
    purpose   TEXT NOT NULL,              -- 'create' | 'join'
    payer     TEXT NOT NULL,
    group_id  TEXT NOT NULL,              -- not a FK: survives group deletion
    used_at   TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
