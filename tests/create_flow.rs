mod common;

use std::sync::Arc;

use common::{memory_service, shared_cipher, submission, test_config};
use idvault::{
    Cipher, IdentityIssuer, IdentityService, IdvaultError, LedgerAnchor, MemoryIssuer,
    MemoryLedger, MemoryStore, OffchainStore, RecordEncoding, MIN_RSA_BITS,
};

#[test]
fn create_anchors_the_stored_record() {
    let service = memory_service();
    let record = service
        .create(&submission("alice", "alice@x.com", "pw1", &["secret1"]))
        .unwrap();

    // The ledger names the record's hash...
    assert_eq!(service.ledger().get("alice").unwrap(), record.content_hash);

    // ...and the record under that hash derives to it.
    let stored = service.store().find_by_hash(&record.content_hash).unwrap();
    assert_eq!(stored, record);
    assert!(stored.verify_content_hash(RecordEncoding::Canonical));
    assert_eq!(stored.password_hash, idvault::hasher::hash(b"pw1"));
    assert!(service.issuer().is_registered("alice"));
}

#[test]
fn stored_record_never_holds_plaintext() {
    let service = memory_service();
    let record = service
        .create(&submission("carol", "carol@x.com", "hunter2", &["ssn-123"]))
        .unwrap();

    let json = serde_json::to_string(&record).unwrap();
    assert!(!json.contains("hunter2"));
    assert!(!json.contains("ssn-123"));
    assert!(!json.contains(&hex::encode("ssn-123")));
}

#[test]
fn second_create_with_same_username_is_duplicate() {
    let service = memory_service();
    let bob = submission("bob", "bob@x.com", "pw", &["b"]);
    let first = service.create(&bob).unwrap();

    let err = service.create(&bob).unwrap_err();
    assert!(matches!(err, IdvaultError::DuplicateUser(ref u) if u == "bob"));

    // Nothing new was persisted.
    assert_eq!(service.store().len(), 1);
    assert_eq!(service.ledger().get("bob").unwrap(), first.content_hash);
}

#[test]
fn invalid_submission_persists_nothing() {
    let service = memory_service();
    for bad in [
        submission("", "x@x", "pw", &[]),
        submission("eve", "", "pw", &[]),
        submission("eve", "e@x", "", &[]),
        submission("e ve", "e@x", "pw", &[]),
    ] {
        assert!(matches!(
            service.create(&bad),
            Err(IdvaultError::Validation(_))
        ));
    }
    assert!(service.store().is_empty());
    assert!(service.ledger().is_empty());
}

#[test]
fn service_refuses_uninitialized_cipher() {
    let result = IdentityService::new(
        MemoryLedger::new(),
        MemoryStore::new(),
        MemoryIssuer::new(),
        Arc::new(Cipher::new(MIN_RSA_BITS)),
        test_config(),
    );
    assert!(matches!(result, Err(IdvaultError::UninitializedKey)));
}

struct RefusingIssuer;

impl IdentityIssuer for RefusingIssuer {
    fn enroll_admin(&self) -> Result<(), IdvaultError> {
        Ok(())
    }

    fn register_user(&self, _username: &str) -> Result<(), IdvaultError> {
        Err(IdvaultError::Rejected("affiliation unknown".into()))
    }
}

#[test]
fn registration_failure_aborts_before_any_write() {
    let service = IdentityService::new(
        MemoryLedger::new(),
        MemoryStore::new(),
        RefusingIssuer,
        shared_cipher(),
        test_config(),
    )
    .unwrap();

    let err = service
        .create(&submission("dave", "d@x", "pw", &["d"]))
        .unwrap_err();
    assert!(matches!(err, IdvaultError::RegistrationFailed(_)));
    assert!(service.store().is_empty());
    assert!(service.ledger().is_empty());
}

#[test]
fn legacy_encoding_hashes_plain_concatenation() {
    let mut config = test_config();
    config.record_encoding = RecordEncoding::Legacy;
    let service = IdentityService::new(
        MemoryLedger::new(),
        MemoryStore::new(),
        MemoryIssuer::new(),
        shared_cipher(),
        config,
    )
    .unwrap();

    let record = service
        .create(&submission("alice", "alice@x.com", "pw1", &["secret1"]))
        .unwrap();
    let concatenated = format!(
        "{}{}{}{}",
        record.username, record.email, record.password_hash, record.private_data
    );
    assert_eq!(
        record.content_hash,
        idvault::hasher::hash(concatenated.as_bytes())
    );

    let view = service.read("alice", Some("pw1")).unwrap();
    assert_eq!(
        view.private_data,
        idvault::PrivateData::Disclosed {
            fields: vec!["secret1".into()]
        }
    );
}
