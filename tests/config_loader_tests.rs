use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;
use tenancy::config::{ConfigError, ConfigLoader, DegradedPolicy, EmbeddedIsolation};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

const VARS: &[&str] = &[
    "TENANCY_PROFILE",
    "TENANCY_LOG_LEVEL",
    "TENANCY_DATABASE_URL",
    "TENANCY_DB_TYPE",
    "TENANCY_DB_PATH",
    "TENANCY_DB_HOST",
    "TENANCY_DB_USER",
    "TENANCY_DB_NAME",
    "TENANCY_DB_PASSWORD",
    "TENANCY_DB_PASSWORD_FILE",
    "TENANCY_EMBEDDED_ISOLATION",
    "TENANCY_DEGRADED_POLICY",
    "TENANCY_SINGLE_TENANT_ID",
];

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.database_url, "sqlite://.local/app.db?mode=rwc");
    assert_eq!(cfg.embedded_isolation, EmbeddedIsolation::Shared);
    assert_eq!(cfg.degraded_policy, DegradedPolicy::Serve);
    assert_eq!(cfg.single_tenant_id, None);
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TENANCY_LOG_LEVEL=warn\n");
    write_env_file(&temp_dir, ".env.test", "TENANCY_LOG_LEVEL=debug\n");
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "TENANCY_EMBEDDED_ISOLATION=per_file\n",
    );
    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "TENANCY_PROFILE=test\nTENANCY_LOG_LEVEL=trace\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.embedded_isolation, EmbeddedIsolation::PerFile);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TENANCY_DEGRADED_POLICY=serve\n");

    unsafe {
        env::set_var("TENANCY_DEGRADED_POLICY", "reject");
        env::set_var("TENANCY_SINGLE_TENANT_ID", "7");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.degraded_policy, DegradedPolicy::Reject);
    assert_eq!(cfg.single_tenant_id, Some(7));

    clear_env();
}

#[test]
fn sqlite_url_is_composed_from_db_path() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "TENANCY_DB_TYPE=sqlite\nTENANCY_DB_PATH=/var/lib/ledger\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads");
    assert_eq!(cfg.database_url, "sqlite:///var/lib/ledger/app.db?mode=rwc");
    assert_eq!(cfg.db_path, PathBuf::from("/var/lib/ledger"));
    clear_env();
}

#[test]
fn postgres_password_file_wins_over_plain_password() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let secret = temp_dir.path().join("db_password");
    fs::write(&secret, "from-file\n").unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!(
            "TENANCY_DB_TYPE=postgres\nTENANCY_DB_HOST=pg\nTENANCY_DB_USER=app\n\
             TENANCY_DB_NAME=ledger\nTENANCY_DB_PASSWORD=plain\nTENANCY_DB_PASSWORD_FILE={}\n",
            secret.display()
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads");
    assert_eq!(cfg.database_url, "postgresql://app:from-file@pg:5432/ledger");

    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("from-file"));
    clear_env();
}

#[test]
fn invalid_isolation_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("TENANCY_EMBEDDED_ISOLATION", "sometimes");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid isolation should fail");
    assert!(matches!(err, ConfigError::InvalidEmbeddedIsolation { .. }));

    clear_env();
}
