//! Reconciliation sweep.
//!
//! Walks every anchor in a range and every off-chain record, and reports
//! where the two stores disagree. The sweep is read-only: it never decides
//! which side is right and never repairs anything. Findings can be
//! forwarded to pluggable sinks for an operator to act on.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AnchorRangeConfig;
use crate::error::IdvaultError;
use crate::ledger::LedgerAnchor;
use crate::record::{CipheredRecord, RecordEncoding};
use crate::store::OffchainStore;

/// One disagreement between the ledger and the off-chain store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A stored record no anchor points at. Expected after a failed anchor
    /// write or a superseded update.
    Orphan {
        content_hash: String,
        username: String,
    },
    /// An anchor whose hash has no stored record.
    DanglingAnchor {
        username: String,
        content_hash: String,
    },
    /// The anchored record carries a different username.
    UsernameMismatch {
        username: String,
        content_hash: String,
        stored_username: String,
    },
    /// The anchored record's fields do not hash to its key.
    HashMismatch {
        username: String,
        content_hash: String,
    },
}

impl Finding {
    /// Orphans are an accepted state; everything else needs an operator.
    pub fn needs_operator(&self) -> bool {
        !matches!(self, Self::Orphan { .. })
    }
}

/// Receives findings as the sweep produces them.
pub trait FindingSink: Send {
    fn record(&mut self, finding: &Finding);
}

/// Appends findings as JSON lines.
pub struct FileFindingSink {
    file: std::fs::File,
}

impl FileFindingSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl FindingSink for FileFindingSink {
    fn record(&mut self, finding: &Finding) {
        match serde_json::to_string(finding) {
            Ok(line) => {
                if let Err(e) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                    warn!(error = %e, "could not write reconciliation finding");
                }
            }
            Err(e) => warn!(error = %e, "could not encode reconciliation finding"),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub anchors_scanned: usize,
    pub records_scanned: usize,
    pub findings: Vec<Finding>,
}

impl ReconciliationReport {
    pub fn orphans(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.needs_operator())
    }

    pub fn problems(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.needs_operator())
    }

    /// `Inconsistent` if any finding needs an operator.
    pub fn ensure_consistent(&self) -> Result<(), IdvaultError> {
        let problems = self.problems().count();
        if problems == 0 {
            Ok(())
        } else {
            Err(IdvaultError::Inconsistent(format!(
                "{} anchor(s) disagree with off-chain records",
                problems
            )))
        }
    }

    /// Send every finding to `sink`.
    pub fn forward(&self, sink: &mut dyn FindingSink) {
        for finding in &self.findings {
            sink.record(finding);
        }
    }
}

/// Compare the anchors in `range` with every off-chain record.
///
/// Records anchored by usernames outside `range` are reported as orphans,
/// so a narrowed range gives a narrowed picture.
pub fn reconcile<L, S>(
    ledger: &L,
    store: &S,
    encoding: RecordEncoding,
    range: &AnchorRangeConfig,
    page_size: usize,
) -> Result<ReconciliationReport, IdvaultError>
where
    L: LedgerAnchor + ?Sized,
    S: OffchainStore + ?Sized,
{
    let mut records: HashMap<String, CipheredRecord> = HashMap::new();
    let mut after: Option<String> = None;
    loop {
        let page = store.find_page(after.as_deref(), page_size.max(1))?;
        let done = page.len() < page_size.max(1);
        after = page.last().map(|r| r.content_hash.clone());
        for record in page {
            records.insert(record.content_hash.clone(), record);
        }
        if done {
            break;
        }
    }
    let records_scanned = records.len();

    let mut findings = Vec::new();
    let mut referenced: HashSet<String> = HashSet::new();
    let mut anchors_scanned = 0;
    for anchor in ledger.range(&range.start, &range.end)? {
        anchors_scanned += 1;
        let username = anchor.username;
        let content_hash = anchor.content_hash;
        referenced.insert(content_hash.clone());
        match records.get(&content_hash) {
            None => findings.push(Finding::DanglingAnchor {
                username,
                content_hash,
            }),
            Some(record) if record.username != username => {
                findings.push(Finding::UsernameMismatch {
                    username,
                    content_hash,
                    stored_username: record.username.clone(),
                })
            }
            Some(record) if !record.verify_content_hash(encoding) => {
                findings.push(Finding::HashMismatch {
                    username,
                    content_hash,
                })
            }
            Some(_) => {}
        }
    }

    let mut orphans: Vec<CipheredRecord> = records
        .into_values()
        .filter(|r| !referenced.contains(&r.content_hash))
        .collect();
    orphans.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
    findings.extend(orphans.into_iter().map(|r| Finding::Orphan {
        content_hash: r.content_hash,
        username: r.username,
    }));

    for finding in &findings {
        if finding.needs_operator() {
            warn!(?finding, "stores disagree");
        } else {
            info!(?finding, "orphan record");
        }
    }
    info!(
        anchors_scanned,
        records_scanned,
        findings = findings.len(),
        "reconciliation sweep finished"
    );

    Ok(ReconciliationReport {
        generated_at: Utc::now(),
        anchors_scanned,
        records_scanned,
        findings,
    })
}
