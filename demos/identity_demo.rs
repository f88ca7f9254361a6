//! End-to-end walk through the identity flows with in-memory stores.
//!
//! Run with: `cargo run --example identity_demo`
//!
//! Set `RUST_LOG=idvault=debug` to watch every flow stage.

use idvault::ledger::IdentityIssuer;
use idvault::reconcile::FileFindingSink;
use idvault::{
    init_cipher, IdentityService, IdvaultConfig, MemoryIssuer, MemoryLedger, MemoryStore,
    UserSubmission,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("idvault=info")),
        )
        .init();

    // 1. Startup: configuration, keypair, admin enrollment.
    let config = match std::env::args().nth(1) {
        Some(path) => IdvaultConfig::from_file(path)?,
        None => IdvaultConfig::default(),
    };
    let cipher = init_cipher(&config)?;
    let issuer = MemoryIssuer::new();
    issuer.enroll_admin()?;

    let service = IdentityService::new(
        MemoryLedger::new(),
        MemoryStore::new(),
        issuer,
        cipher,
        config,
    )?;

    // 2. Register a user.
    let alice = UserSubmission::new(
        "alice",
        "alice@example.com",
        "pw1",
        vec!["passport 12345".into(), "born 1990".into()],
    );
    let record = service.create(&alice)?;
    println!("registered alice under {}", record.content_hash);

    // 3. Read with and without the password.
    let view = service.read("alice", Some("pw1"))?;
    println!("with password:    {}", serde_json::to_string_pretty(&view)?);
    let view = service.read("alice", Some("guess"))?;
    println!("wrong password:   access disclosed = {}", view.private_data.is_disclosed());

    // 4. Update.
    let updated = UserSubmission::new(
        "alice",
        "alice@example.com",
        "pw2",
        vec!["passport 67890".into()],
    );
    let record = service.update("alice", "pw1", &updated)?;
    println!("alice now anchored at {}", record.content_hash);

    // 5. Reconcile and keep the findings on disk.
    let report = service.reconcile()?;
    let findings_path = std::env::temp_dir().join("idvault_findings.jsonl");
    report.forward(&mut FileFindingSink::new(&findings_path)?);
    println!(
        "reconciliation: {} anchors, {} records, {} findings (written to {})",
        report.anchors_scanned,
        report.records_scanned,
        report.findings.len(),
        findings_path.display()
    );
    report.ensure_consistent()?;

    Ok(())
}
