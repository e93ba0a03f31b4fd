//! SQLite schema for the mandate repository.
//!
//! Tables:
//! - `mandates`: Signed mandates, immutable after insert
//! - `mandate_revocations`: One row per revoked mandate

/// DDL for the mandate repository.
///
/// Schema version: 1
pub const MANDATE_SCHEMA: &str = r#"
-- Signed mandates (immutable after insert)
CREATE TABLE IF NOT EXISTS mandates (
    mandate_id          TEXT PRIMARY KEY,
    mandate_kind        TEXT NOT NULL CHECK (mandate_kind IN ('intent', 'cart', 'payment')),
    parent_id           TEXT REFERENCES mandates(mandate_id),
    requesting_agent_id TEXT NOT NULL,
    -- NULL = unrestricted merchant (intents only)
    receiving_agent_id  TEXT,
    payment_reference   TEXT,
    created_at          TEXT NOT NULL,
    expires_at          TEXT NOT NULL,
    canonical_digest    TEXT NOT NULL,
    document            TEXT NOT NULL,
    inserted_at         TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Revocations (first revocation wins)
CREATE TABLE IF NOT EXISTS mandate_revocations (
    mandate_id  TEXT PRIMARY KEY REFERENCES mandates(mandate_id),
    revoked_at  TEXT NOT NULL,
    reason      TEXT
);

-- Indexes for lookups
CREATE INDEX IF NOT EXISTS idx_mandates_kind_agent
    ON mandates(mandate_kind, requesting_agent_id);
CREATE INDEX IF NOT EXISTS idx_mandates_parent
    ON mandates(parent_id);
CREATE INDEX IF NOT EXISTS idx_mandates_payment_reference
    ON mandates(payment_reference);
"#;
