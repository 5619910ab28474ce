use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ingest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bookings-ingest");
    path
}

const CREDENTIAL_VARS: &[&str] = &[
    "BOOKINGS_DATABASE_URL",
    "SUPABASE_URL",
    "SUPABASE_PROJECT_REF",
    "SUPABASE_SERVICE_ROLE_KEY",
];

fn setup_test_env() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("week1.csv"),
        "JOB_REFERENCE_FAKE,CARRIER_CODE,JOB_DTL_SEQUENCE,NB_TEU,HAZ_FLAG\n\
         A,MSC,1,10,true\n\
         A,MSC,2,5,false\n\
         B,CMA,1,3,0\n",
    )
    .unwrap();
    tmp
}

fn db_url(root: &Path) -> String {
    format!("sqlite:{}", root.join("db/bookings.sqlite").display())
}

/// Run the binary in `root` with a scrubbed credential environment plus
/// `env`.
fn run(root: &Path, env: &[(&str, String)], args: &[&str]) -> (String, String, bool) {
    let binary = ingest_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(root).arg("--progress").arg("off").args(args);
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bookings-ingest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn sqlite_env(root: &Path) -> Vec<(&'static str, String)> {
    vec![("BOOKINGS_DATABASE_URL", db_url(root))]
}

#[test]
fn test_missing_credentials_exit_nonzero() {
    let tmp = setup_test_env();
    let (_, stderr, success) = run(tmp.path(), &[], &["ingest", "data"]);
    assert!(!success);
    assert!(stderr.contains("no storage credentials"), "stderr: {}", stderr);
    assert!(!tmp.path().join("db").exists());
}

#[test]
fn test_missing_source_exit_nonzero() {
    let tmp = setup_test_env();
    let (_, stderr, success) = run(tmp.path(), &sqlite_env(tmp.path()), &["ingest", "nowhere"]);
    assert!(!success);
    assert!(stderr.contains("source path does not exist"), "stderr: {}", stderr);
}

#[test]
fn test_no_source_and_no_default_exit_nonzero() {
    let tmp = setup_test_env();
    let (_, stderr, success) = run(tmp.path(), &sqlite_env(tmp.path()), &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("default_source"), "stderr: {}", stderr);
}

#[test]
fn test_chunk_size_out_of_range_exit_nonzero() {
    let tmp = setup_test_env();
    let (_, stderr, success) = run(
        tmp.path(),
        &sqlite_env(tmp.path()),
        &["ingest", "data", "--chunk-size", "5000"],
    );
    assert!(!success);
    assert!(stderr.contains("chunk_size"), "stderr: {}", stderr);
}

#[test]
fn test_migrate_is_idempotent() {
    let tmp = setup_test_env();
    let env = sqlite_env(tmp.path());
    let (stdout, _, success) = run(tmp.path(), &env, &["migrate"]);
    assert!(success);
    assert!(stdout.contains("applied: [1, 2, 3]"), "stdout: {}", stdout);

    let (stdout, _, success) = run(tmp.path(), &env, &["migrate"]);
    assert!(success);
    assert!(stdout.contains("applied: []"), "stdout: {}", stdout);
}

#[test]
fn test_migrate_print_needs_no_credentials() {
    let tmp = setup_test_env();
    let (stdout, _, success) = run(tmp.path(), &[], &["migrate", "--print"]);
    assert!(success);
    assert!(stdout.contains("CREATE TABLE IF NOT EXISTS detail_sequences"));
    assert!(stdout.contains("ON DELETE CASCADE"));
}

#[test]
fn test_ingest_then_reingest_same_counts() {
    let tmp = setup_test_env();
    let env = sqlite_env(tmp.path());
    assert!(run(tmp.path(), &env, &["migrate"]).2);

    for _ in 0..2 {
        let (stdout, stderr, success) = run(tmp.path(), &env, &["ingest", "data"]);
        assert!(success, "stderr: {}", stderr);
        assert!(stdout.contains("rows read: 3"), "stdout: {}", stdout);
        assert!(stdout.contains("unique bookings: 2"));
        assert!(stdout.contains("detail rows: 3"));
        assert!(stdout.contains("booking chunks committed: 1/1"));
        assert!(stdout.contains("detail chunks committed: 1/1"));
        assert!(stdout.trim_end().ends_with("ok"));
    }

    let (stdout, _, success) = run(tmp.path(), &env, &["stats"]);
    assert!(success);
    let count_of = |name: &str| -> String {
        stdout
            .lines()
            .find(|l| l.trim_start().starts_with(name))
            .and_then(|l| l.split_whitespace().last())
            .unwrap_or_default()
            .to_string()
    };
    assert_eq!(count_of("bookings"), "2", "stdout: {}", stdout);
    assert_eq!(count_of("detail_sequences"), "3", "stdout: {}", stdout);
}

#[test]
fn test_failed_file_still_exits_zero() {
    let tmp = setup_test_env();
    fs::write(tmp.path().join("data/broken.csv"), "WRONG,HEADER\nx,y\n").unwrap();
    let env = sqlite_env(tmp.path());
    assert!(run(tmp.path(), &env, &["migrate"]).2);

    let (stdout, _, success) = run(tmp.path(), &env, &["ingest", "data"]);
    assert!(success);
    assert!(stdout.contains("files: 2 (1 ok, 1 failed)"), "stdout: {}", stdout);
    assert!(stdout.contains("FAILED"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let tmp = setup_test_env();
    let (stdout, stderr, success) = run(
        tmp.path(),
        &sqlite_env(tmp.path()),
        &["ingest", "data", "--dry-run"],
    );
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("unique bookings: 2"));
    assert!(!tmp.path().join("db").exists());
}

#[test]
fn test_default_source_from_config() {
    let tmp = setup_test_env();
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("bookings.toml"),
        "[ingest]\ndefault_source = \"data\"\nchunk_size = 1\n",
    )
    .unwrap();
    let env = sqlite_env(tmp.path());
    assert!(run(tmp.path(), &env, &["migrate"]).2);

    let (stdout, stderr, success) = run(tmp.path(), &env, &["ingest"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("booking chunks committed: 2/2"), "stdout: {}", stdout);
    assert!(stdout.contains("detail chunks committed: 3/3"));
}

#[test]
fn test_oversized_backoff_in_config_exit_nonzero() {
    let tmp = setup_test_env();
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("bookings.toml"),
        "[loader]\nbackoff_ms = 86400000\n",
    )
    .unwrap();

    let (_, stderr, success) = run(tmp.path(), &sqlite_env(tmp.path()), &["ingest", "data"]);
    assert!(!success);
    assert!(stderr.contains("loader.backoff_ms"), "stderr: {}", stderr);
}
