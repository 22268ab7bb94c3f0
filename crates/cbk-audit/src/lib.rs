//! Append-only settlement audit log.
//!
//! One JSON line per lifecycle event (bootstrap, submission, amendment),
//! hash-chained: each event records the previous event's hash and its own,
//! computed over canonical (key-sorted, compact) JSON. Editing or deleting
//! any line breaks every hash after it, so the trail is tamper-evident
//! without external infrastructure.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Baseline inventory established.
    Bootstrap,
    /// A completed settlement was persisted.
    Submission,
    /// A persisted settlement was retroactively corrected.
    Amendment,
    /// The closing-stock push to the inventory sync target failed.
    SyncFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub settlement_id: Uuid,
    pub actor: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only writer. Re-opening an existing log restores the chain
/// position from its last line, so restarts keep the chain unbroken.
pub struct AuditLog {
    path: PathBuf,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
        }

        let (last_hash, seq) = match fs::read_to_string(&path) {
            Ok(content) => {
                let mut last_hash = None;
                let mut seq = 0u64;
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    let ev: AuditEvent = serde_json::from_str(line)
                        .context("existing audit log contains an unparseable line")?;
                    last_hash = ev.hash_self.clone();
                    seq = ev.seq + 1;
                }
                (last_hash, seq)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, 0),
            Err(e) => return Err(e).with_context(|| format!("read audit log {path:?}")),
        };

        Ok(AuditLog {
            path,
            last_hash,
            seq,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event and advance the chain.
    pub fn append(
        &mut self,
        kind: AuditKind,
        settlement_id: Uuid,
        actor: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let mut ev = AuditEvent {
            seq: self.seq,
            at: Utc::now(),
            kind,
            settlement_id,
            actor: actor.to_string(),
            payload,
            hash_prev: self.last_hash.clone(),
            hash_self: None,
        };
        let hash = event_hash(&ev)?;
        ev.hash_self = Some(hash.clone());

        let line = canonical_json(&ev)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {:?}", self.path))?;
        f.write_all(line.as_bytes()).context("write audit line")?;
        f.write_all(b"\n").context("write audit newline")?;

        self.last_hash = Some(hash);
        self.seq += 1;
        Ok(ev)
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Hash over canonical JSON of the event WITHOUT hash_self, to avoid
/// self-reference.
pub fn event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Compact JSON with recursively sorted object keys. One event == one line.
fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { events: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainStatus> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_chain_str(&content)
}

pub fn verify_chain_str(content: &str) -> Result<ChainStatus> {
    let mut prev_hash: Option<String> = None;
    let mut events = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        events += 1;

        if ev.hash_prev != prev_hash {
            return Ok(ChainStatus::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {prev_hash:?}, got {:?}",
                    ev.hash_prev
                ),
            });
        }
        let Some(claimed) = ev.hash_self.clone() else {
            return Ok(ChainStatus::Broken {
                line: i + 1,
                reason: "missing hash_self".to_string(),
            });
        };
        let recomputed = event_hash(&ev)?;
        if claimed != recomputed {
            return Ok(ChainStatus::Broken {
                line: i + 1,
                reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
            });
        }
        prev_hash = Some(claimed);
    }

    Ok(ChainStatus::Intact { events })
}
