//! Integration tests driving the fmsearch binary end to end.

use std::fs;
use std::path::Path;
use std::process::{Child, Command, Output};
use std::thread;
use std::time::{Duration, Instant};

fn fmsearch(config_home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fmsearch"));
    // keep the user's config and environment out of the way
    cmd.env("XDG_CONFIG_HOME", config_home);
    for (key, _) in std::env::vars() {
        if key.starts_with("FMSEARCH_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("Failed to execute fmsearch")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn wait_with_deadline(child: &mut Child, what: &str) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("{what} did not exit in time");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_oneshot_index_then_stats() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("a.ap"), "first log line\n").unwrap();
    fs::write(data.join("b.ap"), "second log line\n").unwrap();
    fs::write(data.join("notes.txt"), "not a data file").unwrap();

    let output = run(fmsearch(dir.path()).arg("index").arg(&data).arg("--oneshot"));
    assert!(output.status.success(), "index failed: {output:?}");
    assert!(stdout(&output).contains("Indexed 2 of 2 data files"));
    assert!(data.join("a.ap.fm").exists());
    assert!(data.join("b.ap.fm").exists());
    assert!(!data.join("notes.txt.fm").exists());

    let output = run(fmsearch(dir.path()).arg("stats").arg(&data));
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Data files:       2"));
    assert!(text.contains("Indexed:          2"));
}

#[test]
fn test_custom_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("events.log"), "payload").unwrap();

    let output = run(fmsearch(dir.path())
        .args(["-s", ".log", "-S", ".idx", "index", "--oneshot"])
        .arg(dir.path()));
    assert!(output.status.success(), "index failed: {output:?}");
    assert!(dir.path().join("events.log.idx").exists());
}

#[test]
fn test_serve_answers_search_and_autocomplete() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("a.ap"), "hay needle hay").unwrap();
    fs::write(data.join("b.ap"), "needle").unwrap();
    let socket = dir.path().join("fmsearch.sock");

    let mut server = fmsearch(dir.path())
        .arg("-p")
        .arg(&socket)
        .args(["--request-count", "2", "serve"])
        .arg(&data)
        .spawn()
        .expect("Failed to start server");

    let deadline = Instant::now() + Duration::from_secs(30);
    while !socket.exists() {
        if Instant::now() > deadline {
            let _ = server.kill();
            panic!("server socket never appeared");
        }
        thread::sleep(Duration::from_millis(20));
    }

    let output = run(fmsearch(dir.path())
        .arg("-p")
        .arg(&socket)
        .args(["query", "--no-color", "needle"]));
    assert!(output.status.success(), "search failed: {output:?}");
    assert_eq!(stdout(&output), "b.ap:0+6\na.ap:4+6\n2 matches\n");

    let output = run(fmsearch(dir.path())
        .arg("-p")
        .arg(&socket)
        .args(["query", "--no-color", "--autocomplete", "ne"]));
    assert!(output.status.success(), "autocomplete failed: {output:?}");
    let text = stdout(&output);
    assert!(text.starts_with("a.ap:4:needle hay\nb.ap:0:needle\n"), "{text}");

    let status = wait_with_deadline(&mut server, "server");
    assert!(status.success());
    assert!(!socket.exists());
}

#[test]
fn test_query_without_server_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(fmsearch(dir.path())
        .arg("-p")
        .arg(dir.path().join("absent.sock"))
        .args(["query", "x"]));
    assert_eq!(output.status.code(), Some(71));
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.sock"));
}

#[test]
fn test_invalid_configuration_exits_with_usage() {
    let dir = tempfile::tempdir().unwrap();

    let output = run(fmsearch(dir.path())
        .arg("index")
        .arg(dir.path().join("missing"))
        .arg("--oneshot"));
    assert_eq!(output.status.code(), Some(64));

    let output = run(fmsearch(dir.path())
        .args(["-f", "0", "index", "--oneshot"])
        .arg(dir.path()));
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn test_negative_skip_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(fmsearch(dir.path()).args(["query", "--skip", "-1", "x"]));
    assert!(!output.status.success());
}
