//! End-to-end runs of the `kh` binary against a temporary home.

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

struct Hub {
    home: TempDir,
}

impl Hub {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("temp home"),
        }
    }

    fn kh(&self) -> Command {
        let mut cmd = Command::cargo_bin("kh").expect("kh binary");
        cmd.env("KH_HOME", self.home.path())
            .env("KH_DB", self.home.path().join("data").join("kh.db"))
            .env_remove("KH_EMBEDDING_DIMENSIONS")
            .env_remove("KH_ACTOR")
            .env_remove("RUST_LOG")
            .args(["--actor", "tester", "--quiet"]);
        cmd
    }

    /// Run, expect success, and parse stdout as JSON.
    fn json(&self, args: &[&str]) -> Value {
        let output = self.kh().args(args).output().expect("run kh");
        assert!(
            output.status.success(),
            "kh {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("stdout is JSON")
    }

    /// Run, expect failure, and return the exit code with the JSON error.
    fn failure(&self, args: &[&str]) -> (i32, Value) {
        let output = self.kh().args(args).output().expect("run kh");
        assert!(!output.status.success(), "kh {args:?} unexpectedly succeeded");
        let error = serde_json::from_slice(&output.stderr).expect("stderr is JSON");
        (output.status.code().expect("exit code"), error)
    }
}

#[test]
fn version_reports_schema() {
    let hub = Hub::new();
    let version = hub.json(&["version"]);
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));
    assert!(version["schema"].as_u64().is_some_and(|s| s >= 1));
}

#[test]
fn commands_before_init_report_not_initialized() {
    let hub = Hub::new();
    let (code, error) = hub.failure(&["status"]);
    assert_eq!(code, 2);
    assert_eq!(error["error"]["code"], "NOT_INITIALIZED");
}

#[test]
fn session_and_ingest_flow() {
    let hub = Hub::new();

    let init = hub.json(&["init", "--dimensions", "8"]);
    assert_eq!(init["dimensions"], 8);
    assert!(hub.home.path().join("config.json").exists());
    assert!(hub.home.path().join("data").join("kh.db").exists());

    let start = hub.json(&["session", "start", "--owner", "alice", "--project", "hub"]);
    let session_id = start["id"].as_str().expect("session id").to_string();
    assert_eq!(start["status"], "active");
    assert_eq!(start["created"], true);

    let recorded = hub.json(&["session", "record", &session_id, "Please refactor the parser"]);
    assert_eq!(recorded["inserted"], true);
    assert_eq!(recorded["message_count"], 1);

    let captured = hub.json(&[
        "capture",
        &session_id,
        "Refactored src/parser.rs",
        "--direction",
        "outbound",
        "--tool",
        "edit",
        "--succeeded",
    ]);
    assert_eq!(captured["message_count"], 2);

    // No workers are running, so the wait times out with work queued.
    let ended = hub.json(&["session", "end", &session_id, "--timeout-ms", "50"]);
    assert_eq!(ended["ingestion_complete"], false);
    assert_eq!(ended["outstanding_items"], 2);
    assert_eq!(ended["message_count"], 2);

    let (code, error) = hub.failure(&["session", "end", &session_id]);
    assert_eq!(code, 4);
    assert_eq!(error["error"]["code"], "INVALID_STATE");

    let resumed = hub.json(&["session", "resume", "--owner", "alice"]);
    assert_eq!(resumed["previous_session"]["id"], session_id.as_str());
    assert_eq!(resumed["recent_interactions"].as_array().map(Vec::len), Some(2));
    let again = hub.json(&["session", "resume", "--owner", "alice"]);
    assert_eq!(again["session"]["id"], resumed["session"]["id"]);

    let receipt = hub.json(&[
        "ingest",
        "add",
        "--content",
        "Design notes for the retry queue.",
        "--title",
        "notes",
    ]);
    let doc_id = receipt["document_id"].as_str().expect("document id").to_string();
    assert_eq!(receipt["duplicate"], false);

    let status = hub.json(&["ingest", "status", &doc_id]);
    assert_eq!(status["status"], "pending");
    assert_eq!(status["attempts"], 0);

    let overview = hub.json(&["status"]);
    assert_eq!(overview["dimensions"], 8);
    assert_eq!(overview["queue"]["pending"], 3);
    assert_eq!(overview["vectors"], 0);

    let graph = hub.json(&["graph"]);
    assert_eq!(graph["entities"].as_array().map(Vec::len), Some(0));
}

#[test]
fn missing_session_exits_with_not_found() {
    let hub = Hub::new();
    hub.json(&["init", "--dimensions", "8"]);

    let (code, error) = hub.failure(&["session", "show", "sess_missing"]);
    assert_eq!(code, 3);
    assert_eq!(error["error"]["code"], "SESSION_NOT_FOUND");
}

#[test]
fn bad_context_is_an_invalid_argument() {
    let hub = Hub::new();
    hub.json(&["init", "--dimensions", "8"]);

    let (code, error) = hub.failure(&[
        "session", "start", "--owner", "bob", "--project", "hub", "--context", "[1, 2]",
    ]);
    assert_eq!(code, 4);
    assert_eq!(error["error"]["code"], "INVALID_ARGUMENT");
}
