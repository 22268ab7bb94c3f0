//! Audit hash chain integrity.
//!
//! GREEN when:
//! - Writing 5 settlement events, then verifying, reports an intact chain.
//! - Mutating line 3's payload in the file is detected at that line.
//! - Deleting a middle line is detected as a chain break.

use cbk_audit::{verify_chain, verify_chain_str, AuditKind, AuditLog, ChainStatus};
use serde_json::json;
use uuid::Uuid;

fn write_five(path: &std::path::Path) {
    let mut log = AuditLog::open(path).unwrap();
    for i in 0..5 {
        log.append(
            AuditKind::Submission,
            Uuid::new_v4(),
            "farooq",
            json!({"index": i, "net_profit": 100.0 * i as f64}),
        )
        .unwrap();
    }
}

#[test]
fn untampered_chain_verifies_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    assert_eq!(
        verify_chain(&path).unwrap(),
        ChainStatus::Intact { events: 5 },
        "untampered chain should verify with 5 events"
    );
}

#[test]
fn tampered_payload_detected_at_its_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    // Inflate line 3's profit figure without recomputing its hash.
    lines[2] = lines[2].replace("200.0", "2000.0");
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    match verify_chain(&path).unwrap() {
        ChainStatus::Broken { line, reason } => {
            assert_eq!(line, 3);
            assert!(reason.contains("hash_self mismatch"), "{reason}");
        }
        other => panic!("tampering not detected: {other:?}"),
    }
}

#[test]
fn deleted_line_breaks_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 2)
        .map(|(_, l)| l)
        .collect();

    match verify_chain_str(&kept.join("\n")).unwrap() {
        ChainStatus::Broken { line, reason } => {
            assert_eq!(line, 3, "break surfaces where the successor now sits");
            assert!(reason.contains("hash_prev mismatch"), "{reason}");
        }
        other => panic!("deletion not detected: {other:?}"),
    }
}
