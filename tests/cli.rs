//! End-to-end tests for the commandfuzz binary.
//!
//! These spawn real `sh` processes and assume a Unix host.

#![cfg(unix)]

use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

fn commandfuzz() -> Command {
    Command::cargo_bin("commandfuzz").expect("binary is built")
}

fn wordlist(words: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    for w in words {
        writeln!(file, "{w}").expect("write word");
    }
    file
}

/// Shell snippet whose forked grandchild creates `dir/leaked` after two seconds.
fn leaky_command(dir: &Path) -> String {
    format!("sh -c 'sleep 2 && touch {}/leaked'; true", dir.display())
}

/// Give any surviving grandchild time to create its marker.
fn assert_nothing_leaked(dir: &Path) {
    std::thread::sleep(Duration::from_secs(3));
    assert!(!dir.join("leaked").exists(), "a forked process outlived the run");
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf-8 stdout")
}

#[test]
fn missing_required_flags_print_usage() {
    commandfuzz()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Usage"));

    commandfuzz()
        .args(["-e", "echo FUZZ"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("--wordlist"));
}

#[test]
fn missing_wordlist_is_fatal() {
    commandfuzz()
        .args(["-e", "echo FUZZ", "-w", "/no/such/wordlist.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("wordlist not found"));
}

#[test]
fn zero_threads_is_a_configuration_error() {
    let words = wordlist(&["a"]);
    commandfuzz()
        .args(["-e", "echo FUZZ", "-t", "0", "-w"])
        .arg(words.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--threads"));
}

#[test]
fn reports_every_execution_without_condition() {
    let words = wordlist(&["a", "x", "b"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "test \"FUZZ\" = \"x\"", "-t", "2", "-w"])
            .arg(words.path()),
    );
    assert_eq!(stdout.matches("[+] Command: ").count(), 3);
    assert!(stdout.contains("[3/3]"));
}

#[test]
fn condition_reports_only_matches() {
    let words = wordlist(&["hit", "miss"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "echo FUZZ", "-c", "hit", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert_eq!(stdout.matches("[+] Condition met: hit").count(), 1);
    assert!(stdout.contains("[+] Command: echo \"hit\""));
    assert!(!stdout.contains("miss"));
}

#[test]
fn errors_are_reported_unless_ignored() {
    let words = wordlist(&["one", "two", "three"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "false FUZZ", "-c", "never", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert_eq!(stdout.matches("[-] Error: exit status 1").count(), 3);

    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "false FUZZ", "-c", "never", "--quiet", "-i", "-w"])
            .arg(words.path()),
    );
    assert!(!stdout.contains("[-]"));
}

#[test]
fn stderr_text_is_used_for_error_reports() {
    let words = wordlist(&["boom"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "echo FUZZ >&2; exit 2", "-c", "never", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert!(stdout.contains("[-] Command: echo \"boom\" >&2; exit 2"));
    assert!(stdout.contains("[-] Error: boom"));
}

#[test]
fn sanitize_keeps_entries_literal() {
    let words = wordlist(&["`echo injected`"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "echo FUZZ", "-s", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert!(stdout.contains("[+] Output: `echo injected`"));
}

#[test]
fn json_mode_emits_jsonl() {
    let words = wordlist(&["a", "b"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "echo FUZZ", "--json", "-w"])
            .arg(words.path()),
    );
    let mut ordinals: Vec<u64> = stdout
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).expect("json line"))
        .map(|v| {
            assert_eq!(v["kind"], "output");
            v["ordinal"].as_u64().expect("ordinal")
        })
        .collect();
    ordinals.sort();
    assert_eq!(ordinals, vec![1, 2]);
}

#[test]
fn timeout_kills_hanging_commands() {
    let words = wordlist(&["30"]);
    let started = Instant::now();
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", "sleep FUZZ", "--timeout", "200ms", "-c", "x", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert!(stdout.contains("[-] Error: timed out after 200ms"));
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn summary_goes_to_stderr() {
    let words = wordlist(&["a", "b"]);
    commandfuzz()
        .args(["-e", "echo FUZZ", "-c", "a", "-w"])
        .arg(words.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("[*] Done: 2/2 executed, 1 matched, 0 failed"));
}

#[test]
fn timeout_kills_the_whole_process_group() {
    let dir = tempfile::tempdir().expect("temp dir");
    let words = wordlist(&["a", "b"]);
    let stdout = stdout_of(
        commandfuzz()
            .args(["-e", &leaky_command(dir.path())])
            .args(["--timeout", "300ms", "-c", "zzz", "--quiet", "-w"])
            .arg(words.path()),
    );
    assert_eq!(stdout.matches("[-] Error: timed out after 300ms").count(), 2);
    assert_nothing_leaked(dir.path());
}

#[test]
fn interrupt_exits_130_and_kills_children() {
    let dir = tempfile::tempdir().expect("temp dir");
    let words = wordlist(&["a", "b"]);
    let template = format!(
        "touch {}/started-FUZZ; {}",
        dir.path().display(),
        leaky_command(dir.path())
    );
    let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("commandfuzz"))
        .args(["-e", &template, "--quiet", "-w"])
        .arg(words.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn commandfuzz");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !dir.path().join("started-a").exists() {
        assert!(Instant::now() < deadline, "commands never started");
        std::thread::sleep(Duration::from_millis(20));
    }
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");

    let out = child.wait_with_output().expect("wait for commandfuzz");
    assert_eq!(out.status.code(), Some(130));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("[!] Interrupted"), "stderr: {stderr}");
    assert_nothing_leaked(dir.path());
}

#[test]
fn closed_stdout_fails_the_run() {
    let dir = tempfile::tempdir().expect("temp dir");
    let entries: Vec<String> = (1..=200).map(|i| i.to_string()).collect();
    let entries: Vec<&str> = entries.iter().map(String::as_str).collect();
    let words = wordlist(&entries);
    let template = format!("touch {}/ran-FUZZ; echo FUZZ", dir.path().display());
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("commandfuzz"))
        .args(["-e", &template, "--quiet", "-w"])
        .arg(words.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn commandfuzz");
    drop(child.stdout.take());

    let out = child.wait_with_output().expect("wait for commandfuzz");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to write reports"), "stderr: {stderr}");
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
    let ran = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert!(ran < 50, "kept executing after stdout closed: {ran} commands ran");
}
