//! Collecting files and the `option-merge` binary.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

use option_merge::{from_fn, Collector, Path, Source, Value};

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn fixture() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let base = write(
        &dir,
        "base.toml",
        "name = \"app\"\n\n[server]\nhost = \"0.0.0.0\"\nport = 80\n",
    );
    let local = write(
        &dir,
        "local.json",
        r#"{"server": {"port": 8080}, "banner": "{name} on {server.port}"}"#,
    );
    (dir, base, local)
}

#[test]
fn test_later_files_override_earlier_ones() {
    let (_dir, base, local) = fixture();

    let mut collector = Collector::new();
    collector.collect(&base).unwrap();
    collector.collect(&local).unwrap();
    let options = collector.prepare().unwrap();

    assert_eq!(options.get_value("server.port").unwrap(), Value::Integer(8080));
    assert_eq!(options.get_value("server.host").unwrap(), Value::from("0.0.0.0"));

    let sources = options.source_for("server.port");
    assert_eq!(sources.len(), 2);
    assert!(matches!(&sources[0], Source::File { path, .. } if path.ends_with("local.json")));
    assert!(matches!(&sources[1], Source::File { path, .. } if path.ends_with("base.toml")));
}

#[test]
fn test_registered_converters_run_on_prepare() {
    let (_dir, base, _) = fixture();

    let mut collector = Collector::new();
    collector.collect_under(&base, Path::from_segments(["apps", "main"])).unwrap();
    collector
        .register_converters([(
            "apps.main.server.port",
            from_fn(|_, value| Ok(Value::Integer(value.as_i64().unwrap_or(0) + 1))),
        )])
        .unwrap();

    let options = collector.prepare().unwrap();
    assert_eq!(
        options.get_converted("apps.main.server.port").unwrap(),
        Value::Integer(81)
    );
    assert_eq!(
        options.get_value("apps.main.server.port").unwrap(),
        Value::Integer(80)
    );
}

// =============================================================================
// Binary
// =============================================================================

fn option_merge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_option-merge"))
}

#[test]
fn test_cli_get_and_format() {
    let (_dir, base, local) = fixture();

    let output = option_merge()
        .args(["-f"])
        .arg(&base)
        .args(["-f"])
        .arg(&local)
        .args(["get", "server.port"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "8080");

    let output = option_merge()
        .arg("-f")
        .arg(&base)
        .arg("-f")
        .arg(&local)
        .args(["get", "banner", "--format"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"app on 8080\"");
}

#[test]
fn test_cli_sources_and_missing_key() {
    let (_dir, base, local) = fixture();

    let output = option_merge()
        .arg("-f")
        .arg(&base)
        .arg("-f")
        .arg(&local)
        .args(["sources", "server.host"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.contains("base.toml (sha256:"));

    let output = option_merge()
        .arg("-f")
        .arg(&base)
        .args(["get", "nope"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Key not found: nope"));
}

#[test]
fn test_cli_reports_every_broken_file() {
    let dir = TempDir::new().unwrap();
    let broken = write(&dir, "broken.json", "{");
    let list = write(&dir, "list.json", "[1]");

    let output = option_merge()
        .arg("-f")
        .arg(&broken)
        .arg("-f")
        .arg(&list)
        .arg("dump")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Some of the configuration was broken"));
    assert!(stderr.contains("broken.json"));
    assert!(stderr.contains("list.json"));
}

#[test]
fn test_cli_follows_includes() {
    let dir = TempDir::new().unwrap();
    write(&dir, "db.json", r#"{"port": 5432}"#);
    let main = write(
        &dir,
        "main.toml",
        "includes = [{ path = \"db.json\", prefix = [\"services\", \"db\"] }]\n",
    );

    let output = option_merge()
        .arg("-f")
        .arg(&main)
        .args(["--includes", "includes", "get", "services.db.port"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5432");
}
