//! Mandate repository: the only shared mutable state around verification.
//!
//! [`SqliteMandateRepository`] gives linearisable store/find/revoke per
//! mandate id:
//! - Store is idempotent for identical content, errors on conflict
//! - Every write runs in a single `BEGIN IMMEDIATE` transaction
//! - Revocation is recorded once; later attempts report `false`

use crate::schema::MANDATE_SCHEMA;
use ap2_mandate::crypto::jcs;
use ap2_mandate::{
    CartMandate, IntentMandate, Mandate, MandateError, MandateKind, PaymentMandate,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Repository errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("mandate {mandate_id} already stored with different content")]
    Conflict { mandate_id: String },

    #[error("mandate {mandate_id} references unknown parent {parent_id}")]
    ParentNotFound {
        mandate_id: String,
        parent_id: String,
    },

    #[error("mandate {mandate_id} must reference a {expected} mandate, {parent_id} is a {found}")]
    ParentKind {
        mandate_id: String,
        parent_id: String,
        expected: MandateKind,
        found: String,
    },

    #[error("failed to encode mandate {mandate_id}: {reason}")]
    Serialization { mandate_id: String, reason: String },

    #[error("invalid mandate: {0}")]
    Invalid(#[from] MandateError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Lookup, storage and revocation of mandates.
pub trait MandateRepository: Send + Sync {
    /// Store an intent; returns its id.
    fn store_intent_mandate(&self, mandate: &IntentMandate) -> Result<String, StoreError>;

    /// Store a cart; its parent intent must already be stored.
    fn store_cart_mandate(&self, mandate: &CartMandate) -> Result<String, StoreError>;

    /// Store a payment; its parent cart must already be stored.
    fn store_payment_mandate(&self, mandate: &PaymentMandate) -> Result<String, StoreError>;

    /// Store a verified cart and payment together, or neither.
    fn store_chain(&self, cart: &CartMandate, payment: &PaymentMandate) -> Result<(), StoreError>;

    fn find_intent_mandate(&self, mandate_id: &str) -> Result<Option<IntentMandate>, StoreError>;

    fn find_cart_mandate(&self, mandate_id: &str) -> Result<Option<CartMandate>, StoreError>;

    fn find_payment_mandate(&self, mandate_id: &str)
        -> Result<Option<PaymentMandate>, StoreError>;

    /// Newest unrevoked, unexpired intent of `agent_id` covering `merchant_id`.
    ///
    /// Merchant-specific intents win over unrestricted ones.
    fn find_active_intent_for_agent(
        &self,
        agent_id: &str,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IntentMandate>, StoreError>;

    /// Payment mandate whose `payment_reference` is `payment_id`.
    fn find_payment_mandate_for_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentMandate>, StoreError>;

    fn find_cart_mandate_for_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<CartMandate>, StoreError> {
        match self.find_payment_mandate_for_payment(payment_id)? {
            Some(payment) => self.find_cart_mandate(&payment.parent_cart_mandate_id),
            None => Ok(None),
        }
    }

    fn find_intent_mandate_for_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<IntentMandate>, StoreError> {
        match self.find_cart_mandate_for_payment(payment_id)? {
            Some(cart) => self.find_intent_mandate(&cart.parent_intent_mandate_id),
            None => Ok(None),
        }
    }

    /// Revoke a mandate. `true` only for the first revocation of a stored
    /// mandate.
    fn revoke_mandate(&self, mandate_id: &str, reason: &str) -> Result<bool, StoreError>;

    fn revoked_at(&self, mandate_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn is_revoked(&self, mandate_id: &str) -> Result<bool, StoreError> {
        Ok(self.revoked_at(mandate_id)?.is_some())
    }
}

/// Indexed columns plus the full document of one mandate.
struct MandateRow {
    mandate_id: String,
    kind: MandateKind,
    parent_id: Option<String>,
    requesting_agent_id: String,
    receiving_agent_id: Option<String>,
    payment_reference: Option<String>,
    created_at: String,
    expires_at: String,
    canonical_digest: String,
    document: String,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl MandateRow {
    fn from_mandate(mandate: &Mandate) -> Result<Self, StoreError> {
        let encode_error = |e: &dyn std::fmt::Display| StoreError::Serialization {
            mandate_id: mandate.id().to_string(),
            reason: e.to_string(),
        };

        let canonical = jcs::to_vec(mandate).map_err(|e| encode_error(&e))?;
        let document = serde_json::to_string(mandate).map_err(|e| encode_error(&e))?;
        let header = mandate.header();

        Ok(Self {
            mandate_id: header.id.clone(),
            kind: mandate.kind(),
            parent_id: mandate.parent_id().map(str::to_string),
            requesting_agent_id: header.requesting_agent_id.clone(),
            receiving_agent_id: header.receiving_agent.agent_id().map(str::to_string),
            payment_reference: mandate
                .as_payment()
                .and_then(|p| p.payment_reference.clone()),
            created_at: timestamp(header.created_at),
            expires_at: timestamp(header.expires_at),
            canonical_digest: format!("sha256:{}", hex::encode(Sha256::digest(&canonical))),
            document,
        })
    }
}

/// SQLite-backed mandate repository.
#[derive(Clone)]
pub struct SqliteMandateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMandateRepository {
    /// Open a file-backed repository.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory repository.
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL");
        conn.execute_batch(MANDATE_SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    /// Run `f` inside `BEGIN IMMEDIATE` .. `COMMIT`, rolling back on error.
    fn in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;

        // BEGIN IMMEDIATE acquires write lock immediately
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = f(&conn);

        match &result {
            Ok(_) => {
                conn.execute("COMMIT", [])?;
            }
            Err(_) => {
                let _ = conn.execute("ROLLBACK", []);
            }
        }

        result
    }

    fn insert(conn: &Connection, mandate: &Mandate) -> Result<String, StoreError> {
        mandate.validate()?;
        let row = MandateRow::from_mandate(mandate)?;

        if let (Some(parent_id), Some(expected)) = (&row.parent_id, row.kind.parent_kind()) {
            let found: Option<String> = conn
                .query_row(
                    "SELECT mandate_kind FROM mandates WHERE mandate_id = ?1",
                    [parent_id],
                    |r| r.get(0),
                )
                .optional()?;
            match found {
                None => {
                    return Err(StoreError::ParentNotFound {
                        mandate_id: row.mandate_id,
                        parent_id: parent_id.clone(),
                    })
                }
                Some(found) if found != expected.as_str() => {
                    return Err(StoreError::ParentKind {
                        mandate_id: row.mandate_id,
                        parent_id: parent_id.clone(),
                        expected,
                        found,
                    })
                }
                Some(_) => {}
            }
        }

        conn.execute(
            r#"
            INSERT INTO mandates (
                mandate_id, mandate_kind, parent_id, requesting_agent_id,
                receiving_agent_id, payment_reference, created_at, expires_at,
                canonical_digest, document
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(mandate_id) DO NOTHING
            "#,
            params![
                row.mandate_id,
                row.kind.as_str(),
                row.parent_id,
                row.requesting_agent_id,
                row.receiving_agent_id,
                row.payment_reference,
                row.created_at,
                row.expires_at,
                row.canonical_digest,
                row.document,
            ],
        )?;

        // Verify consistency if already existed
        let stored: String = conn.query_row(
            "SELECT canonical_digest FROM mandates WHERE mandate_id = ?1",
            [&row.mandate_id],
            |r| r.get(0),
        )?;
        if stored != row.canonical_digest {
            return Err(StoreError::Conflict {
                mandate_id: row.mandate_id,
            });
        }

        Ok(row.mandate_id)
    }

    fn store(&self, mandate: Mandate) -> Result<String, StoreError> {
        self.in_transaction(|conn| Self::insert(conn, &mandate))
    }

    fn decode(mandate_id: &str, document: &str) -> Result<Mandate, StoreError> {
        serde_json::from_str(document).map_err(|e| StoreError::Serialization {
            mandate_id: mandate_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn load(&self, mandate_id: &str, kind: MandateKind) -> Result<Option<Mandate>, StoreError> {
        let conn = self.lock()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM mandates WHERE mandate_id = ?1 AND mandate_kind = ?2",
                params![mandate_id, kind.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        document
            .map(|doc| Self::decode(mandate_id, &doc))
            .transpose()
    }

    /// Revoke with an explicit timestamp.
    pub fn revoke_mandate_at(
        &self,
        mandate_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let revoked = self.in_transaction(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM mandates WHERE mandate_id = ?1",
                    [mandate_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(false);
            }
            let inserted = conn.execute(
                r#"
                INSERT INTO mandate_revocations (mandate_id, revoked_at, reason)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(mandate_id) DO NOTHING
                "#,
                params![mandate_id, timestamp(now), reason],
            )?;
            Ok(inserted == 1)
        })?;

        if revoked {
            info!(mandate_id, reason, "mandate revoked");
        }
        Ok(revoked)
    }

    /// Number of stored mandates.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM mandates", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

impl MandateRepository for SqliteMandateRepository {
    fn store_intent_mandate(&self, mandate: &IntentMandate) -> Result<String, StoreError> {
        self.store(Mandate::Intent(mandate.clone()))
    }

    fn store_cart_mandate(&self, mandate: &CartMandate) -> Result<String, StoreError> {
        self.store(Mandate::Cart(mandate.clone()))
    }

    fn store_payment_mandate(&self, mandate: &PaymentMandate) -> Result<String, StoreError> {
        self.store(Mandate::Payment(mandate.clone()))
    }

    fn store_chain(&self, cart: &CartMandate, payment: &PaymentMandate) -> Result<(), StoreError> {
        let cart = Mandate::Cart(cart.clone());
        let payment = Mandate::Payment(payment.clone());
        self.in_transaction(|conn| {
            Self::insert(conn, &cart)?;
            Self::insert(conn, &payment)?;
            Ok(())
        })
    }

    fn find_intent_mandate(&self, mandate_id: &str) -> Result<Option<IntentMandate>, StoreError> {
        Ok(match self.load(mandate_id, MandateKind::Intent)? {
            Some(Mandate::Intent(m)) => Some(m),
            _ => None,
        })
    }

    fn find_cart_mandate(&self, mandate_id: &str) -> Result<Option<CartMandate>, StoreError> {
        Ok(match self.load(mandate_id, MandateKind::Cart)? {
            Some(Mandate::Cart(m)) => Some(m),
            _ => None,
        })
    }

    fn find_payment_mandate(
        &self,
        mandate_id: &str,
    ) -> Result<Option<PaymentMandate>, StoreError> {
        Ok(match self.load(mandate_id, MandateKind::Payment)? {
            Some(Mandate::Payment(m)) => Some(m),
            _ => None,
        })
    }

    fn find_active_intent_for_agent(
        &self,
        agent_id: &str,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IntentMandate>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.mandate_id, m.document FROM mandates m
            WHERE m.mandate_kind = 'intent'
              AND m.requesting_agent_id = ?1
              AND (m.receiving_agent_id IS NULL OR m.receiving_agent_id = ?2)
              AND NOT EXISTS (
                  SELECT 1 FROM mandate_revocations r WHERE r.mandate_id = m.mandate_id
              )
            ORDER BY m.receiving_agent_id IS NULL, m.created_at DESC, m.mandate_id
            "#,
        )?;
        let rows = stmt.query_map(params![agent_id, merchant_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (mandate_id, document) = row?;
            if let Mandate::Intent(intent) = Self::decode(&mandate_id, &document)? {
                if !intent.is_expired_at(now) {
                    return Ok(Some(intent));
                }
            }
        }
        Ok(None)
    }

    fn find_payment_mandate_for_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentMandate>, StoreError> {
        let row: Option<(String, String)> = {
            let conn = self.lock()?;
            conn.query_row(
                r#"
                SELECT mandate_id, document FROM mandates
                WHERE mandate_kind = 'payment' AND payment_reference = ?1
                ORDER BY created_at DESC, mandate_id
                LIMIT 1
                "#,
                [payment_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
        };

        Ok(match row {
            Some((mandate_id, document)) => match Self::decode(&mandate_id, &document)? {
                Mandate::Payment(m) => Some(m),
                _ => None,
            },
            None => None,
        })
    }

    fn revoke_mandate(&self, mandate_id: &str, reason: &str) -> Result<bool, StoreError> {
        self.revoke_mandate_at(mandate_id, reason, Utc::now())
    }

    fn revoked_at(&self, mandate_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let s: Option<String> = conn
            .query_row(
                "SELECT revoked_at FROM mandate_revocations WHERE mandate_id = ?1",
                [mandate_id],
                |r| r.get(0),
            )
            .optional()?;

        match s {
            Some(ts) => {
                let dt = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| StoreError::Database(format!("invalid revoked_at timestamp: {e}")))?
                    .with_timezone(&Utc);
                Ok(Some(dt))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_mandate::{CartItem, ReceivingAgent};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
    }

    fn intent(id: &str, merchant: ReceivingAgent, created: DateTime<Utc>) -> IntentMandate {
        IntentMandate::builder()
            .id(id)
            .requesting_agent("agent-1")
            .receiving_agent(merchant)
            .max_amount_per_payment(Decimal::new(200, 0))
            .created_at(created)
            .expires_at(created + Duration::days(1))
            .build()
            .unwrap()
    }

    fn cart(id: &str, parent: &str) -> CartMandate {
        CartMandate::builder()
            .id(id)
            .requesting_agent("agent-1")
            .merchant("merchant-1")
            .parent_intent(parent)
            .item(CartItem::new("sku", "x", Decimal::new(1000, 2), 1).unwrap())
            .currency("USD")
            .created_at(t0())
            .expires_at(t0() + Duration::hours(1))
            .build()
            .unwrap()
    }

    fn payment(id: &str, parent: &str, reference: &str) -> PaymentMandate {
        PaymentMandate::builder()
            .id(id)
            .requesting_agent("agent-1")
            .merchant("merchant-1")
            .parent_cart(parent)
            .amount(Decimal::new(1000, 2))
            .currency("USD")
            .payment_reference(reference)
            .created_at(t0())
            .expires_at(t0() + Duration::minutes(15))
            .build()
            .unwrap()
    }

    fn repo_with_intent() -> SqliteMandateRepository {
        let repo = SqliteMandateRepository::memory().unwrap();
        repo.store_intent_mandate(&intent("intent-1", ReceivingAgent::agent("merchant-1"), t0()))
            .unwrap();
        repo
    }

    #[test]
    fn test_store_and_find_roundtrip() {
        let repo = repo_with_intent();
        let found = repo.find_intent_mandate("intent-1").unwrap().unwrap();
        assert_eq!(
            found,
            intent("intent-1", ReceivingAgent::agent("merchant-1"), t0())
        );
        assert!(repo.find_cart_mandate("intent-1").unwrap().is_none());
        assert!(repo.find_intent_mandate("missing").unwrap().is_none());
    }

    #[test]
    fn test_store_is_idempotent() {
        let repo = repo_with_intent();
        let id = repo
            .store_intent_mandate(&intent("intent-1", ReceivingAgent::agent("merchant-1"), t0()))
            .unwrap();
        assert_eq!(id, "intent-1");
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_store_conflict() {
        let repo = repo_with_intent();
        let mut changed = intent("intent-1", ReceivingAgent::agent("merchant-1"), t0());
        changed.max_amount_per_payment = Decimal::new(999, 0);
        assert_eq!(
            repo.store_intent_mandate(&changed).unwrap_err(),
            StoreError::Conflict {
                mandate_id: "intent-1".to_string()
            }
        );
    }

    #[test]
    fn test_parent_must_exist_with_right_kind() {
        let repo = repo_with_intent();
        assert!(matches!(
            repo.store_cart_mandate(&cart("cart-1", "intent-x")),
            Err(StoreError::ParentNotFound { .. })
        ));

        repo.store_cart_mandate(&cart("cart-1", "intent-1")).unwrap();
        // A cart cannot hang under another cart
        assert!(matches!(
            repo.store_cart_mandate(&cart("cart-2", "cart-1")),
            Err(StoreError::ParentKind { .. })
        ));
    }

    #[test]
    fn test_store_chain_is_atomic() {
        let repo = repo_with_intent();
        // Payment points at a cart that is not part of the chain
        let err = repo
            .store_chain(&cart("cart-1", "intent-1"), &payment("pay-1", "cart-9", "psp-1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound { .. }));
        assert!(repo.find_cart_mandate("cart-1").unwrap().is_none());

        repo.store_chain(&cart("cart-1", "intent-1"), &payment("pay-1", "cart-1", "psp-1"))
            .unwrap();
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn test_find_by_payment_reference() {
        let repo = repo_with_intent();
        repo.store_chain(&cart("cart-1", "intent-1"), &payment("pay-1", "cart-1", "psp-42"))
            .unwrap();

        assert_eq!(
            repo.find_payment_mandate_for_payment("psp-42")
                .unwrap()
                .map(|p| p.header.id),
            Some("pay-1".to_string())
        );
        assert_eq!(
            repo.find_cart_mandate_for_payment("psp-42")
                .unwrap()
                .map(|c| c.header.id),
            Some("cart-1".to_string())
        );
        assert_eq!(
            repo.find_intent_mandate_for_payment("psp-42")
                .unwrap()
                .map(|i| i.header.id),
            Some("intent-1".to_string())
        );
        assert!(repo.find_intent_mandate_for_payment("psp-0").unwrap().is_none());
    }

    #[test]
    fn test_revoke_first_wins() {
        let repo = repo_with_intent();
        assert!(!repo.is_revoked("intent-1").unwrap());
        assert!(repo.revoke_mandate_at("intent-1", "lost phone", t0()).unwrap());
        assert!(!repo.revoke_mandate("intent-1", "again").unwrap());
        assert!(!repo.revoke_mandate("missing", "nope").unwrap());
        assert_eq!(repo.revoked_at("intent-1").unwrap(), Some(t0()));
    }

    #[test]
    fn test_active_intent_lookup() {
        let repo = SqliteMandateRepository::memory().unwrap();
        let now = t0() + Duration::hours(2);

        repo.store_intent_mandate(&intent("any", ReceivingAgent::Unrestricted, t0()))
            .unwrap();
        assert_eq!(
            repo.find_active_intent_for_agent("agent-1", "merchant-1", now)
                .unwrap()
                .map(|i| i.header.id),
            Some("any".to_string())
        );

        repo.store_intent_mandate(&intent(
            "specific",
            ReceivingAgent::agent("merchant-1"),
            t0() - Duration::hours(1),
        ))
        .unwrap();
        assert_eq!(
            repo.find_active_intent_for_agent("agent-1", "merchant-1", now)
                .unwrap()
                .map(|i| i.header.id),
            Some("specific".to_string())
        );

        repo.revoke_mandate("specific", "user").unwrap();
        assert_eq!(
            repo.find_active_intent_for_agent("agent-1", "merchant-1", now)
                .unwrap()
                .map(|i| i.header.id),
            Some("any".to_string())
        );

        // Both expired a day after creation
        let later = t0() + Duration::days(2);
        assert!(repo
            .find_active_intent_for_agent("agent-1", "merchant-1", later)
            .unwrap()
            .is_none());
        assert!(repo
            .find_active_intent_for_agent("agent-2", "merchant-1", now)
            .unwrap()
            .is_none());
    }
}
