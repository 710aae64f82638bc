//! Exit-code tests for the `testgate` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;
use testgate::exit_codes;

/// Temp working directory whose config points the cache at a private dir.
fn workspace() -> TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache_dir = temp.path().join("cache");
    fs::write(
        temp.path().join(".testgate.toml"),
        format!("[cache]\ndir = {:?}\n", cache_dir.to_string_lossy()),
    )
    .expect("write config");
    temp
}

fn testgate(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_testgate"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("run testgate")
}

#[test]
fn invalidate_without_entry_succeeds() {
    let temp = workspace();
    let out = testgate(temp.path(), &["invalidate"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn status_outside_repository_is_stale() {
    let temp = workspace();
    let out = testgate(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::STALE));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "stale");
}

#[test]
fn key_prints_sixteen_hex_chars() {
    let temp = workspace();
    let out = testgate(temp.path(), &["key"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let key = stdout.lines().next().expect("key line");
    assert_eq!(key.len(), 16);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn invalid_config_exits_with_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join(".testgate.toml"),
        "[timeouts]\nvet_secs = 0\n",
    )
    .expect("write config");
    let out = testgate(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("timeouts.vet_secs"));
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = testgate(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let path = temp.path().join(".testgate.toml");
    let written = fs::read_to_string(&path).expect("read config");
    assert!(written.contains("[timeouts]"));

    let again = testgate(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    fs::write(&path, "[timeouts]\nvet_secs = 0\n").expect("break config");
    let forced = testgate(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
    assert_eq!(fs::read_to_string(&path).expect("read config"), written);
}

#[test]
fn unknown_command_is_rejected() {
    let temp = workspace();
    let out = testgate(temp.path(), &["frobnicate"]);
    assert!(!out.status.success());
}

/// `go` stand-in that logs its directory and arguments, then reports a pass.
#[cfg(unix)]
const FAKE_GO: &str = r#"#!/bin/sh
echo "$(pwd -P) $*" >> "$GO_LOG"
case "$1" in
  version) echo "go version go1.22.3 linux/amd64" ;;
  test) printf 'ok  \texample.com/svc\t0.010s\tcoverage: 50.0%% of statements\n' ;;
esac
exit 0
"#;

#[cfg(unix)]
#[test]
fn run_from_module_subdirectory_tests_that_module() {
    use std::os::unix::fs::PermissionsExt;
    use testgate::test_support::TestRepo;

    let Some(repo) = TestRepo::new().expect("repo") else {
        return;
    };
    repo.write_file("svc/go.mod", "module example.com/svc\n\ngo 1.22\n")
        .expect("write go.mod");
    repo.write_file("svc/svc.go", "package svc\n").expect("write svc.go");

    let tools = tempfile::tempdir().expect("tempdir");
    let bin = tools.path().join("bin");
    fs::create_dir_all(&bin).expect("mkdir bin");
    let go = bin.join("go");
    fs::write(&go, FAKE_GO).expect("write fake go");
    fs::set_permissions(&go, fs::Permissions::from_mode(0o755)).expect("chmod");
    let log = tools.path().join("go.log");

    fs::write(
        repo.path().join(".testgate.toml"),
        format!(
            "[cache]\ndir = {:?}\n\n[badges]\nenabled = false\n",
            tools.path().join("cache").to_string_lossy()
        ),
    )
    .expect("write config");

    let path = std::env::var_os("PATH").unwrap_or_default();
    let mut dirs = vec![bin.clone()];
    dirs.extend(std::env::split_paths(&path));
    let module = repo.path().join("svc");
    let out = Command::new(env!("CARGO_BIN_EXE_testgate"))
        .arg("run")
        .current_dir(&module)
        .env("PATH", std::env::join_paths(dirs).expect("join PATH"))
        .env("GO_LOG", &log)
        .env_remove("RUST_LOG")
        .output()
        .expect("run testgate");
    assert_eq!(
        out.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let module = fs::canonicalize(&module).expect("canonicalize");
    let logged = fs::read_to_string(&log).expect("read go log");
    assert!(logged.lines().any(|line| line.ends_with(" test -race -cover -count=1 ./...")));
    for line in logged.lines() {
        assert!(
            line.starts_with(&format!("{} ", module.display())),
            "go ran outside the module: {line}"
        );
    }
}
