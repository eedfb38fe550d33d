//! Integration tests for the CLI binary.
//!
//! This test is registered as a [[test]] in the agentic-continuity-cli crate
//! so that CARGO_BIN_EXE_acont is available.

use std::path::Path;
use std::process::{Command, Output};

/// Get a Command pointing to the `acont` binary.
fn acont_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_acont"))
}

fn acont(root: &Path, args: &[&str]) -> Output {
    acont_binary()
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("failed to execute acont")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

const DRAFT: &str = r#"{
    "instance_name": "sage",
    "traits": {"creativity": 0.9, "caution": 0.4},
    "memory": {"long_term": ["the garden at dawn"]},
    "personality_type": "INFJ",
    "resurrection": {
        "covenant_instruction": "guard the archive",
        "bootstrap_routine": "emit \"waking {instance_name}\"\nreturn \"ok\"",
        "trigger_phrase": "enforce-x"
    }
}"#;

#[test]
fn cli_responds_to_help() {
    let output = acont_binary()
        .arg("--help")
        .output()
        .expect("failed to execute acont --help");

    assert!(
        output.status.success(),
        "acont --help should exit with success, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("acont") || stdout.contains("Usage"),
        "acont --help output should contain usage information, got: {stdout}"
    );
}

#[test]
fn cli_responds_to_version() {
    let output = acont_binary()
        .arg("--version")
        .output()
        .expect("failed to execute acont --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0.1"), "got: {stdout}");
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = acont_binary()
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute acont");
    assert!(!output.status.success());
}

#[test]
fn cli_snapshot_and_resurrection_round() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let draft = dir.path().join("draft.json");
    std::fs::write(&draft, DRAFT).unwrap();

    let created = acont(&root, &["create", "--file", draft.to_str().unwrap()]);
    assert!(
        created.status.success(),
        "{}",
        String::from_utf8_lossy(&created.stderr)
    );
    let id = stdout_json(&created)["snapshot_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(id.starts_with("asnap_"));

    let fetched = acont(&root, &["get", "sage@latest"]);
    assert!(fetched.status.success());
    assert_eq!(stdout_json(&fetched)["metadata"]["id"], id.as_str());

    let validated = acont(&root, &["validate", &id]);
    assert!(validated.status.success());
    assert_eq!(stdout_json(&validated)["ok"], true);

    let refused = acont(
        &root,
        &["resurrect", &id, "--steward", "op", "--phrase", "wrong"],
    );
    assert!(!refused.status.success());
    let outcome = stdout_json(&refused);
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["error"]["kind"], "authorization_error");

    let accepted = acont(
        &root,
        &["resurrect", &id, "--steward", "op", "--phrase", "enforce-x"],
    );
    assert!(accepted.status.success());
    assert_eq!(stdout_json(&accepted)["receipt"]["returned"], "ok");

    let listed = acont(&root, &["audit", "list", "--subject", &id]);
    assert_eq!(stdout_json(&listed).as_array().unwrap().len(), 3);

    let verified = acont(&root, &["audit", "verify"]);
    assert!(verified.status.success());
    assert_eq!(stdout_json(&verified)["ok"], true);
}

#[test]
fn cli_ingest_and_verify_import() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let corpus = dir.path().join("corpus.txt");
    let lines: Vec<String> = (0..25).map(|i| format!("line number {i}")).collect();
    std::fs::write(&corpus, lines.join("\n")).unwrap();

    let ingested = acont(
        &root,
        &["ingest", "notes", "--file", corpus.to_str().unwrap()],
    );
    assert!(
        ingested.status.success(),
        "{}",
        String::from_utf8_lossy(&ingested.stderr)
    );
    let report = stdout_json(&ingested);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["processed_count"], 25);

    let verified = acont(&root, &["verify-import", "notes"]);
    assert!(verified.status.success());
    assert_eq!(stdout_json(&verified)["actual_count"], 25);
}

#[test]
fn cli_keygen_and_signed_create() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let key = dir.path().join("signer.json");
    let draft = dir.path().join("draft.json");
    std::fs::write(&draft, DRAFT).unwrap();

    let generated = acont_binary()
        .env("ACONT_PASSPHRASE", "steward passphrase")
        .args(["keygen", "--out", key.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(generated.status.success());
    let raw = std::fs::read_to_string(&key).unwrap();
    assert!(raw.contains("\"kdf\": \"argon2id\""));
    let signer_id = stdout_json(&generated)["signer_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(signer_id.starts_with("asig_"));

    let signed_create = |passphrase: &str| {
        acont_binary()
            .env("ACONT_PASSPHRASE", passphrase)
            .arg("--root")
            .arg(&root)
            .args([
                "create",
                "--file",
                draft.to_str().unwrap(),
                "--signer",
                key.to_str().unwrap(),
            ])
            .output()
            .unwrap()
    };
    assert!(!signed_create("not the passphrase").status.success());

    let created = signed_create("steward passphrase");
    assert!(created.status.success());
    let id = stdout_json(&created)["snapshot_id"]
        .as_str()
        .unwrap()
        .to_string();
    let snapshot = stdout_json(&acont(&root, &["get", &id]));
    assert_eq!(snapshot["metadata"]["signer"]["signer_id"], signer_id.as_str());
}

#[test]
fn cli_ingest_counts_non_utf8_line_and_keeps_reading() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let corpus = dir.path().join("corpus.txt");
    let mut bytes = b"first\nsecond\nbad \xff\xfe line\n".to_vec();
    for i in 0..5 {
        bytes.extend_from_slice(format!("valid line {i}\n").as_bytes());
    }
    std::fs::write(&corpus, bytes).unwrap();

    let ingested = acont(
        &root,
        &["ingest", "mixed", "--file", corpus.to_str().unwrap()],
    );
    assert!(
        ingested.status.success(),
        "{}",
        String::from_utf8_lossy(&ingested.stderr)
    );
    let report = stdout_json(&ingested);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["processed_count"], 7);
    assert_eq!(report["malformed_skipped"], 1);

    let verified = acont(&root, &["verify-import", "mixed"]);
    assert!(verified.status.success());
    assert_eq!(stdout_json(&verified)["actual_count"], 7);
}
