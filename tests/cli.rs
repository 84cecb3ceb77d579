//! `psync` binary behavior against a temporary database and config.

use assert_cmd::Command;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("psync").unwrap();
        cmd.env("HOME", self.dir.path())
            .env("PANTRY_SYNC_DB", self.path("pantry-sync.db"))
            .env("PANTRY_SYNC_CONFIG", self.path("config.json"))
            .env("PANTRY_SYNC_USER", "tester")
            .env_remove("PANTRY_SYNC_ENDPOINT")
            .env_remove("PANTRY_SYNC_TOKEN")
            .env_remove("PANTRY_SYNC_TEST")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run a command expected to succeed and parse its JSON output.
    fn ok(&self, args: &[&str]) -> Value {
        let assert = self.cmd().arg("--json").args(args).assert().success();
        serde_json::from_slice(&assert.get_output().stdout).unwrap()
    }

    /// Run a command expected to fail with `code` and parse its JSON error.
    fn fails(&self, args: &[&str], code: i32) -> Value {
        let assert = self
            .cmd()
            .arg("--json")
            .args(args)
            .assert()
            .failure()
            .code(code);
        let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
        let last = stderr.lines().filter(|l| !l.trim().is_empty()).last().unwrap();
        serde_json::from_str(last).unwrap()
    }
}

/// Minimal HTTP server: answers every request with 200 and `{"id": ...}`.
fn serve(requests: Arc<Mutex<Vec<String>>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header.trim().is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            requests.lock().unwrap().push(request_line.trim().to_string());

            let payload = r#"{"id":"p1"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        }
    });
    port
}

#[test]
fn version_reports_package_version() {
    let sandbox = Sandbox::new();
    let output = sandbox.ok(&["version"]);
    assert_eq!(output["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(output["queueSchema"], 2);
}

#[test]
fn enqueue_accepts_synonyms_and_lists_in_priority_order() {
    let sandbox = Sandbox::new();

    let first = sandbox.ok(&["enqueue", "item", "add", "--id", "p1", "--data", r#"{"name":"Milk"}"#]);
    assert!(first["id"].as_str().unwrap().starts_with("chg_"));
    assert_eq!(first["entity"], "product");
    assert_eq!(first["op"], "create");
    assert_eq!(first["queueDepth"], 1);

    let second = sandbox.ok(&[
        "enqueue", "list", "rm", "--id", "l1", "--priority", "urgent",
    ]);
    assert_eq!(second["entity"], "shoppingList");
    assert_eq!(second["op"], "delete");
    assert_eq!(second["priority"], "high");

    let listed = sandbox.ok(&["queue", "list"]);
    assert_eq!(listed["total"], 2);
    assert_eq!(listed["changes"][0]["entityId"], "l1");
    assert_eq!(listed["changes"][1]["entityId"], "p1");
    assert_eq!(listed["changes"][1]["originUser"], "tester");
    assert!(listed["changes"][1]["originDevice"]
        .as_str()
        .unwrap()
        .starts_with("dev_"));
}

#[test]
fn enqueue_rejects_unknown_entity_with_suggestion() {
    let sandbox = Sandbox::new();
    let error = sandbox.fails(
        &["enqueue", "prodcut", "create", "--id", "p1", "--data", "{}"],
        4,
    );
    assert_eq!(error["error"]["code"], "INVALID_ENTITY");
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("product"));
}

#[test]
fn enqueue_requires_a_record_for_updates() {
    let sandbox = Sandbox::new();
    let error = sandbox.fails(&["enqueue", "recipe", "update", "--id", "r1"], 4);
    assert_eq!(error["error"]["code"], "INVALID_ARGUMENT");
}

#[test]
fn queue_drop_and_clear() {
    let sandbox = Sandbox::new();
    let queued = sandbox.ok(&["enqueue", "product", "delete", "--id", "p1"]);
    sandbox.ok(&["enqueue", "product", "delete", "--id", "p2"]);
    let id = queued["id"].as_str().unwrap().to_string();

    let error = sandbox.fails(&["queue", "drop", "chg_nope"], 3);
    assert_eq!(error["error"]["code"], "CHANGE_NOT_FOUND");

    let dropped = sandbox.ok(&["queue", "drop", &id]);
    assert_eq!(dropped["queueDepth"], 1);

    sandbox.fails(&["queue", "clear"], 4);
    let cleared = sandbox.ok(&["queue", "clear", "--force"]);
    assert_eq!(cleared["cleared"], 1);
    assert_eq!(sandbox.ok(&["queue", "list"])["total"], 0);
}

#[test]
fn sync_without_remote_is_a_config_error() {
    let sandbox = Sandbox::new();
    let error = sandbox.fails(&["sync"], 7);
    assert_eq!(error["error"]["code"], "CONFIG_ERROR");
    assert!(error["error"]["hint"].as_str().unwrap().contains("remote.endpoint"));
}

#[test]
fn sync_reports_unreachable_remote_and_keeps_changes() {
    let sandbox = Sandbox::new();
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    sandbox.ok(&["config", "set", "remote.endpoint", &format!("http://127.0.0.1:{port}")]);
    sandbox.ok(&["enqueue", "product", "delete", "--id", "p1"]);

    let error = sandbox.fails(&["sync"], 9);
    assert_eq!(error["error"]["code"], "REMOTE_UNREACHABLE");
    assert_eq!(sandbox.ok(&["queue", "list"])["total"], 1);
}

#[test]
fn sync_pushes_changes_and_records_history() {
    let sandbox = Sandbox::new();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let port = serve(Arc::clone(&requests));
    sandbox.ok(&["config", "set", "remote.endpoint", &format!("http://127.0.0.1:{port}")]);
    sandbox.ok(&["enqueue", "product", "create", "--id", "p1", "--data", r#"{"name":"Milk"}"#]);

    let output = sandbox.ok(&["sync"]);
    assert_eq!(output["outcome"], "completed");
    assert_eq!(output["result"]["synced"], 1);
    assert_eq!(output["result"]["failed"], 0);

    let seen = requests.lock().unwrap().clone();
    assert!(seen.iter().any(|r| r.starts_with("GET /health")), "{seen:?}");
    assert!(seen.iter().any(|r| r.starts_with("POST /products")), "{seen:?}");

    assert_eq!(sandbox.ok(&["queue", "list"])["total"], 0);
    let history = sandbox.ok(&["history"]);
    assert_eq!(history["count"], 1);
    assert_eq!(history["runs"][0]["synced"], 1);
    assert_eq!(history["runs"][0]["outcome"], "completed");

    let status = sandbox.ok(&["status"]);
    assert_eq!(status["queueDepth"], 0);
    assert_eq!(status["lastRun"]["synced"], 1);
}

#[test]
fn config_set_show_and_reset() {
    let sandbox = Sandbox::new();
    sandbox.ok(&["config", "set", "maxRetries", "5"]);
    sandbox.ok(&["config", "set", "strategy.recipe", "merge"]);
    sandbox.ok(&["config", "set", "remote.apiToken", "secret"]);

    let shown = sandbox.ok(&["config", "show"]);
    assert_eq!(shown["config"]["sync"]["maxRetries"], 5);
    assert_eq!(shown["config"]["sync"]["strategyOverrides"]["recipe"], "merge");
    assert_eq!(shown["config"]["remote"]["apiToken"], "********");

    let error = sandbox.fails(&["config", "set", "maxRetry", "5"], 7);
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("maxRetries"));
    sandbox.fails(&["config", "set", "batchSize", "0"], 7);

    sandbox.ok(&["config", "reset"]);
    let shown = sandbox.ok(&["config", "show"]);
    assert_eq!(shown["config"]["sync"]["maxRetries"], 3);
    assert!(shown["config"]["remote"].get("apiToken").is_none());
}

#[test]
fn status_counts_priorities() {
    let sandbox = Sandbox::new();
    sandbox.ok(&["enqueue", "product", "delete", "--id", "p1", "--priority", "low"]);
    sandbox.ok(&["enqueue", "product", "delete", "--id", "p2", "--priority", "high"]);
    sandbox.ok(&["enqueue", "recipe", "delete", "--id", "r1"]);

    let status = sandbox.ok(&["status"]);
    assert_eq!(status["queueDepth"], 3);
    assert_eq!(status["priorities"]["high"], 1);
    assert_eq!(status["priorities"]["normal"], 1);
    assert_eq!(status["priorities"]["low"], 1);
    assert_eq!(status["oldest"]["entityId"], "p1");
    assert!(status["lastRun"].is_null());
}

#[test]
fn completions_name_the_binary() {
    let sandbox = Sandbox::new();
    let assert = sandbox.cmd().args(["completions", "bash"]).assert().success();
    let script = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(script.contains("psync"));
}
