use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use super::types::{default_worker_count, BackendConfig, PoolConfig};
use crate::error::PoolError;

fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn parse_empty_toml_uses_defaults() {
    let cfg: PoolConfig = toml::from_str("").unwrap();
    assert_eq!(cfg, PoolConfig::default());
    assert_eq!(cfg.max_workers, None);
    assert_eq!(cfg.min_workers, 0);
    assert_eq!(cfg.idle_timeout_ms, 0);
    assert!(!cfg.use_main_thread);
    assert_eq!(cfg.backend, BackendConfig::Thread);
}

#[test]
fn parse_full_toml() {
    let toml = r#"
max_workers = 4
min_workers = 2
idle_timeout_ms = 500
use_main_thread = true
terminate_grace_ms = 250

[backend]
kind = "process"
binary = "target/debug/jobsys-worker"
args = ["--quiet"]
"#;
    let cfg: PoolConfig = toml::from_str(toml).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.max_workers, Some(4));
    assert_eq!(cfg.min_workers, 2);
    assert_eq!(cfg.idle_timeout_ms, 500);
    assert!(cfg.use_main_thread);
    assert_eq!(
        cfg.backend,
        BackendConfig::Process {
            binary: PathBuf::from("target/debug/jobsys-worker"),
            args: vec!["--quiet".to_string()],
        }
    );
}

#[test]
fn zero_max_workers_is_rejected() {
    let cfg: PoolConfig = toml::from_str("max_workers = 0").unwrap();
    assert!(matches!(cfg.validate(), Err(PoolError::Config(_))));
}

#[test]
fn wrong_types_fail_to_parse() {
    for bad in [
        "max_workers = -1",
        "min_workers = \"two\"",
        "idle_timeout_ms = 1.5",
        "use_main_thread = \"yes\"",
        "[backend]\nkind = \"fiber\"",
    ] {
        let result = PoolConfig::from_toml(bad);
        assert!(
            matches!(result, Err(PoolError::ConfigParse(_))),
            "expected parse error for {bad:?}"
        );
    }
}

#[test]
fn empty_process_binary_is_rejected() {
    let cfg = PoolConfig::process("");
    assert!(matches!(cfg.validate(), Err(PoolError::Config(_))));
}

#[test]
fn resolve_clamps_min_to_max() {
    let cfg = PoolConfig {
        max_workers: Some(2),
        min_workers: 5,
        idle_timeout_ms: 150,
        ..PoolConfig::default()
    };
    let settings = cfg.resolve(default_worker_count, 8);
    assert_eq!(settings.max_workers, 2);
    assert_eq!(settings.min_workers, 2);
    assert_eq!(settings.idle_timeout, Duration::from_millis(150));
}

#[test]
fn resolve_uses_policy_when_max_unset() {
    let cfg = PoolConfig::default();
    assert_eq!(cfg.resolve(default_worker_count, 16).max_workers, 8);
    assert_eq!(cfg.resolve(|_| 3, 16).max_workers, 3);
    // a policy returning 0 still yields a usable pool
    assert_eq!(cfg.resolve(|_| 0, 16).max_workers, 1);
}

#[test]
fn default_worker_count_heuristic() {
    assert_eq!(default_worker_count(0), 1);
    assert_eq!(default_worker_count(1), 1);
    assert_eq!(default_worker_count(2), 1);
    assert_eq!(default_worker_count(4), 3);
    assert_eq!(default_worker_count(5), 4);
    assert_eq!(default_worker_count(6), 3);
    assert_eq!(default_worker_count(32), 16);
}

#[test]
fn env_overrides_apply() {
    let mut cfg = PoolConfig::default();
    cfg.apply_overrides_from(overrides(&[
        ("JOBSYS_MAX_WORKERS", "6"),
        ("JOBSYS_MIN_WORKERS", "1"),
        ("JOBSYS_IDLE_TIMEOUT_MS", " 900 "),
        ("JOBSYS_USE_MAIN_THREAD", "true"),
        ("JOBSYS_WORKER_BINARY", "/opt/jobsys/worker"),
    ]))
    .unwrap();

    assert_eq!(cfg.max_workers, Some(6));
    assert_eq!(cfg.min_workers, 1);
    assert_eq!(cfg.idle_timeout_ms, 900);
    assert!(cfg.use_main_thread);
    assert_eq!(
        cfg.backend,
        BackendConfig::Process {
            binary: PathBuf::from("/opt/jobsys/worker"),
            args: Vec::new(),
        }
    );
}

#[test]
fn worker_binary_override_keeps_args() {
    let mut cfg = PoolConfig::process("old");
    if let BackendConfig::Process { args, .. } = &mut cfg.backend {
        args.push("--flag".into());
    }
    cfg.apply_overrides_from(overrides(&[("JOBSYS_WORKER_BINARY", "new")]))
        .unwrap();
    assert_eq!(
        cfg.backend,
        BackendConfig::Process {
            binary: PathBuf::from("new"),
            args: vec!["--flag".to_string()],
        }
    );
}

#[test]
fn invalid_env_override_is_config_error() {
    let mut cfg = PoolConfig::default();
    let err = cfg
        .apply_overrides_from(overrides(&[("JOBSYS_MAX_WORKERS", "many")]))
        .unwrap_err();
    assert!(matches!(err, PoolError::Config(msg) if msg.contains("JOBSYS_MAX_WORKERS")));
}

#[test]
fn from_file_reads_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_workers = 3\nidle_timeout_ms = 10").unwrap();

    let cfg = PoolConfig::from_file(file.path()).unwrap();
    // env may override in CI; only assert what overrides cannot touch
    assert_eq!(cfg.terminate_grace_ms, 2_000);
}

#[test]
fn from_file_missing_is_io_error() {
    let result = PoolConfig::from_file("/definitely/not/here/jobsys.toml");
    assert!(matches!(result, Err(PoolError::ConfigIo(_))));
}
