//! Purpose: End-to-end tests for the HTTP/JSON server.
//! Exports: None (integration test module).
//! Role: Validate interpret, completion, listing, and shutdown persistence across TCP.
//! Invariants: Uses loopback-only server with a temp state directory.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(state_dir: &std::path::Path, extra_args: &[&str]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_notebridge"))
                .arg("--state-dir")
                .arg(state_dir)
                .args(extra_args)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .env("RUST_LOG", "warn")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn interpret(&self, note: &str, text: &str) -> TestResult<Value> {
        let response = ureq::post(&self.url(&format!("/v0/notes/{note}/interpret")))
            .send_json(json!({ "text": text }))?;
        Ok(response.into_json()?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn interpret_returns_result_envelopes() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(temp.path(), &[])?;

    let body = server.interpret("n1", "a = [1, 2, 3]\nb = [4, 5]\ntable a b")?;
    assert_eq!(body["note"], "n1");
    assert_eq!(body["result"]["status"], "success");
    assert_eq!(body["result"]["kind"], "table");
    assert_eq!(body["result"]["payload"], "a\tb\n1\t4\n2\t5");

    let body = server.interpret("n1", "print $missing")?;
    assert_eq!(body["result"]["status"], "error");
    assert!(
        body["result"]["payload"]
            .as_str()
            .unwrap_or_default()
            .contains("undefined variable: missing")
    );

    let body = server.interpret("n2", "print $a")?;
    assert_eq!(body["result"]["status"], "error");
    Ok(())
}

#[test]
fn completion_cancel_and_listing() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(temp.path(), &[])?;
    server.interpret("n", "alpha = 1\nalps = 2\nbeta = 3")?;

    let body: Value = ureq::get(&server.url("/v0/notes/n/completion"))
        .query("buffer", "show al")
        .call()?
        .into_json()?;
    assert_eq!(body["candidates"], json!(["alpha", "alps"]));

    let cancel = ureq::post(&server.url("/v0/notes/n/cancel")).call()?;
    assert_eq!(cancel.status(), 200);

    let body: Value = ureq::get(&server.url("/v0/notes")).call()?.into_json()?;
    assert_eq!(body["live"], json!(["n"]));
    assert_eq!(body["saved"], json!(["n"]));
    Ok(())
}

#[test]
fn malformed_body_is_rejected() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let server = TestServer::start(temp.path(), &[])?;
    let result = ureq::post(&server.url("/v0/notes/n/interpret"))
        .set("content-type", "application/json")
        .send_string("{\"nope\":1}");
    match result {
        Err(ureq::Error::Status(code, _)) => assert!((400..500).contains(&code)),
        other => panic!("expected client error, got {other:?}"),
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn sigterm_saves_sessions_before_exit() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let state_dir = temp.path().join("states");
    let mut server = TestServer::start(&state_dir, &["--no-eager-save"])?;
    server.interpret("late", "kept = yes")?;
    assert!(!state_dir.join("late.state").exists());

    let status = Command::new("kill")
        .args(["-TERM", &server.child.id().to_string()])
        .status()?;
    assert!(status.success());

    let start = Instant::now();
    loop {
        if let Some(status) = server.child.try_wait()? {
            assert!(status.success());
            break;
        }
        if start.elapsed() > Duration::from_secs(10) {
            return Err("server did not exit after SIGTERM".into());
        }
        sleep(Duration::from_millis(20));
    }
    assert!(state_dir.join("late.state").is_file());
    Ok(())
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}
