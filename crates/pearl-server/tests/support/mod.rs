//! Shared harness for `pearl-server` integration tests: spawns the compiled
//! `pearl serve` binary against a throwaway config and temp directory, waits
//! for `/health`, and kills the process on drop.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Binds an ephemeral port, reads it back, then drops the listener so the
/// child process can bind it. A small TOCTOU window exists but is acceptable
/// for test isolation.
pub fn reserve_local_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to reserve local port");
    listener.local_addr().expect("failed to read reserved port").port()
}

pub struct PearlServer {
    child: Child,
    pub base_url: String,
    _dir: TempDir,
}

impl PearlServer {
    /// Writes `config_yaml` to a temp dir and spawns `pearl --config <path> serve`,
    /// blocking until `/health` answers or `timeout` elapses.
    pub async fn start(config_yaml: &str, port: u16) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config_path = dir.path().join("pearl.yaml");
        std::fs::write(&config_path, config_yaml).expect("write config");

        let bin = std::env::var("CARGO_BIN_EXE_pearl").expect("CARGO_BIN_EXE_pearl is not available");
        let child = Command::new(bin)
            .arg("--config")
            .arg(&config_path)
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn pearl serve");

        let base_url = format!("http://127.0.0.1:{port}");
        let server = PearlServer { child, base_url, _dir: dir };
        server.wait_ready(Duration::from_secs(10)).await;
        server
    }

    async fn wait_ready(&self, timeout: Duration) {
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", self.base_url);
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                panic!("pearl serve did not become ready at {health_url}");
            }
            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(40)).await,
            }
        }
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for PearlServer {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Common scaffolding every test config needs: a bind address, temp-scoped
/// persistence paths, and sunrise disabled (it otherwise fires on a timer and
/// would make routing/memory assertions nondeterministic). `extra` is appended
/// as additional top-level YAML stanzas (e.g. `routing:`, `backends:`).
pub fn base_config(dir: &std::path::Path, port: u16, extra: &str) -> String {
    format!(
        r#"
server:
  bind_addr: "127.0.0.1:{port}"
  auth_enabled: false
memory:
  store_path: "{store}"
sunrise:
  enabled: false
persistence:
  transcript_dir: "{transcripts}"
  request_log_path: "{request_log}"
  credentials_path: "{credentials}"
{extra}
"#,
        port = port,
        store = dir.join("memories.db").display(),
        transcripts = dir.join("transcripts").display(),
        request_log = dir.join("requests.jsonl").display(),
        credentials = dir.join("credentials.json").display(),
        extra = extra,
    )
}

pub fn unique_dir() -> TempDir {
    TempDir::new().expect("tempdir")
}

pub fn read_request_log(path: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("request log line is valid JSON"))
        .collect()
}
