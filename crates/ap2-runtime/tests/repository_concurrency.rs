//! Multi-connection tests for the SQLite mandate repository.
//!
//! Two repositories opened on the same file race each other, so the
//! guarantees come from SQLite itself rather than from the in-process mutex.

use ap2_mandate::{IntentMandate, ReceivingAgent};
use ap2_runtime::{MandateRepository, SqliteMandateRepository, StoreError};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::NamedTempFile;

fn intent(id: &str, max: i64) -> IntentMandate {
    let t0 = Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap();
    IntentMandate::builder()
        .id(id)
        .requesting_agent("agent-1")
        .receiving_agent(ReceivingAgent::agent("merchant-1"))
        .max_amount_per_payment(Decimal::new(max, 0))
        .created_at(t0)
        .expires_at(t0 + Duration::days(1))
        .build()
        .unwrap()
}

/// Two connections revoking the same mandate: exactly one wins.
#[test]
fn test_two_connections_revoke_once() {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path();

    let repo1 = SqliteMandateRepository::open(path).unwrap();
    repo1.store_intent_mandate(&intent("intent-1", 200)).unwrap();
    let repo2 = SqliteMandateRepository::open(path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [repo1, repo2]
        .into_iter()
        .enumerate()
        .map(|(i, repo)| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                repo.revoke_mandate("intent-1", &format!("conn-{i}"))
            })
        })
        .collect();

    let results: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| **r).count(), 1, "{results:?}");

    let repo = SqliteMandateRepository::open(path).unwrap();
    assert!(repo.is_revoked("intent-1").unwrap());
}

/// Same id, different content on two connections: one stores, the other
/// sees a conflict; identical content is accepted by both.
#[test]
fn test_two_connections_conflicting_store() {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    // Create the schema before racing
    SqliteMandateRepository::open(&path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [100, 300]
        .into_iter()
        .map(|max| {
            let barrier = barrier.clone();
            let path = path.clone();
            thread::spawn(move || {
                let repo = SqliteMandateRepository::open(&path).unwrap();
                barrier.wait();
                repo.store_intent_mandate(&intent("intent-1", max))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let stored = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
        .count();
    assert_eq!((stored, conflicts), (1, 1), "{results:?}");

    let repo = SqliteMandateRepository::open(&path).unwrap();
    let winner = repo.find_intent_mandate("intent-1").unwrap().unwrap();
    assert!([Decimal::new(100, 0), Decimal::new(300, 0)].contains(&winner.max_amount_per_payment));
    assert_eq!(repo.count().unwrap(), 1);
}

/// Revocation written on one connection is visible on another.
#[test]
fn test_revocation_visible_across_connections() {
    let tmp = NamedTempFile::new().unwrap();
    let repo1 = SqliteMandateRepository::open(tmp.path()).unwrap();
    let repo2 = SqliteMandateRepository::open(tmp.path()).unwrap();

    repo1.store_intent_mandate(&intent("intent-1", 200)).unwrap();
    let now = Utc.with_ymd_and_hms(2026, 1, 28, 13, 0, 0).unwrap();
    assert!(repo2
        .find_active_intent_for_agent("agent-1", "merchant-1", now)
        .unwrap()
        .is_some());

    assert!(repo1.revoke_mandate("intent-1", "user").unwrap());
    assert!(repo2.is_revoked("intent-1").unwrap());
    assert!(repo2
        .find_active_intent_for_agent("agent-1", "merchant-1", now)
        .unwrap()
        .is_none());
}
