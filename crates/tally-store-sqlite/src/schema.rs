//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (repo, date); re-observation overwrites, never duplicates.
CREATE TABLE IF NOT EXISTS daily_views (
    repo        TEXT    NOT NULL,
    date        TEXT    NOT NULL,   -- YYYY-MM-DD
    count       INTEGER NOT NULL,
    uniques     INTEGER NOT NULL,
    observed_at TEXT    NOT NULL,   -- RFC 3339 UTC
    PRIMARY KEY (repo, date)
);

-- Window totals; replaced wholesale on every fetch.
CREATE TABLE IF NOT EXISTS current_totals (
    repo        TEXT    PRIMARY KEY,
    count       INTEGER NOT NULL,
    uniques     INTEGER NOT NULL,
    observed_at TEXT    NOT NULL
);

-- Popular paths and referrers. The set for one (repo, kind, date) is only
-- ever deleted and re-inserted inside a single transaction.
CREATE TABLE IF NOT EXISTS ranked_items (
    repo        TEXT    NOT NULL,
    kind        TEXT    NOT NULL,   -- 'path' | 'referrer'
    date        TEXT    NOT NULL,
    item_key    TEXT    NOT NULL,
    title       TEXT,
    count       INTEGER NOT NULL,
    uniques     INTEGER NOT NULL,
    observed_at TEXT    NOT NULL,
    PRIMARY KEY (repo, kind, date, item_key)
);

-- Never deleted. first_seen is write-once; last_seen only moves forward.
CREATE TABLE IF NOT EXISTS usage_records (
    feature        TEXT    NOT NULL,
    repo           TEXT    NOT NULL,
    workflow_path  TEXT    NOT NULL,
    version        TEXT,
    stars          INTEGER,
    language       TEXT,
    first_seen     TEXT    NOT NULL,
    last_seen      TEXT    NOT NULL,
    is_active      INTEGER NOT NULL,
    deactivated_on TEXT,
    updated_at     TEXT    NOT NULL,
    PRIMARY KEY (feature, repo, workflow_path),
    CHECK (last_seen >= first_seen)
);

CREATE TABLE IF NOT EXISTS usage_history (
    feature       TEXT    NOT NULL,
    date          TEXT    NOT NULL,
    total_count   INTEGER NOT NULL,
    added_count   INTEGER NOT NULL,
    removed_count INTEGER NOT NULL,
    PRIMARY KEY (feature, date)
);

CREATE INDEX IF NOT EXISTS usage_records_active_idx ON usage_records(feature, is_active);

PRAGMA user_version = 1;
";
