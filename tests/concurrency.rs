mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{memory_service, submission};
use idvault::{Cipher, IdvaultError, LedgerAnchor, OffchainStore, MIN_RSA_BITS};

#[test]
fn concurrent_creates_for_distinct_users() {
    let service = Arc::new(memory_service());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let name = format!("user{}", i);
                service
                    .create(&submission(&name, &format!("{}@x", name), "pw", &[name.as_str()]))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        let record = handle.join().unwrap();
        assert_eq!(
            service.ledger().get(&record.username).unwrap(),
            record.content_hash
        );
    }
    assert_eq!(service.store().find_all().unwrap().len(), 8);
    assert!(service.reconcile().unwrap().findings.is_empty());
}

#[test]
fn racing_creates_for_one_username_anchor_once() {
    let service = Arc::new(memory_service());
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.create(&submission("bob", "bob@x", &format!("pw{}", i), &["b"]))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, IdvaultError::DuplicateUser(_)), "{:?}", e);
        }
    }
    assert_eq!(service.ledger().get("bob").unwrap(), winners[0].content_hash);

    // Losers that got past the uniqueness check left only orphans.
    let report = service.reconcile().unwrap();
    assert!(report.ensure_consistent().is_ok());
}

#[test]
fn racing_updates_for_one_user_leave_the_anchor_readable() {
    let service = Arc::new(memory_service());
    let before = service
        .create(&submission("carol", "c@x", "pw", &["v0"]))
        .unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (1..=4)
        .map(|i| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let field = format!("v{}", i);
                barrier.wait();
                service.update(
                    "carol",
                    "pw",
                    &submission("carol", "c@x", "pw", &[field.as_str()]),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert!(!winners.is_empty());
    for result in &results {
        if let Err(e) = result {
            // A late reader can catch the anchor before its record lands.
            assert!(matches!(e, IdvaultError::Unavailable(_)), "{:?}", e);
        }
    }

    let anchored = service.ledger().get("carol").unwrap();
    assert_ne!(anchored, before.content_hash);
    assert!(winners.iter().any(|r| r.content_hash == anchored));
    assert!(service.store().find_by_hash(&anchored).is_ok());

    let view = service.read("carol", Some("pw")).unwrap();
    assert_eq!(view.content_hash, anchored);
    assert!(view.private_data.is_disclosed());

    // Superseded versions are orphans; nothing dangles.
    let report = service.reconcile().unwrap();
    assert!(report.ensure_consistent().is_ok());
}

#[test]
fn late_cipher_initializers_fail() {
    let cipher = Arc::new(Cipher::new(MIN_RSA_BITS));
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cipher = Arc::clone(&cipher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cipher.init()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(matches!(err, IdvaultError::KeyAlreadyInitialized));
    }

    let envelope = cipher.encrypt(b"after init").unwrap();
    assert_eq!(cipher.decrypt(&envelope).unwrap(), b"after init");
}
