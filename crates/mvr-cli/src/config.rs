//! Persisted settings – reads/writes `~/.mvr/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mvr_runtime::{CycleConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Simulated robot used by the demo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// How often the simulated receiver publishes a motor packet.
    pub packet_period_ms: u64,
    /// Forward velocity requested by the wander behavior, mm/s.
    pub wander_vel: f64,
    /// Velocity cap applied by the speed-cap behavior, mm/s.
    pub speed_cap: f64,
    pub pose_log_interval_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            packet_period_ms: 20,
            wander_vel: 300.0,
            speed_cap: 600.0,
            pose_log_interval_ms: 1000,
        }
    }
}

impl SimConfig {
    pub fn packet_period(&self) -> Duration {
        Duration::from_millis(self.packet_period_ms)
    }

    pub fn pose_log_interval(&self) -> Duration {
        Duration::from_millis(self.pose_log_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_format: LogFormat,
    pub cycle: CycleConfig,
    pub sim: SimConfig,
}

/// `$MVR_CONFIG` if set, otherwise `~/.mvr/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MVR_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mvr").join("config.toml")
}

/// `Ok(None)` when no config file exists yet.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MVR_*` environment overrides. Unparseable values are ignored.
///
/// | Variable            | Config field                        |
/// |---------------------|-------------------------------------|
/// | `MVR_CYCLE_MS`      | `cycle.cycle_time_ms`               |
/// | `MVR_PRECEDENCE_MS` | `cycle.direct_motion_precedence_ms` |
/// | `MVR_REFRESH_MS`    | `cycle.state_reflection_refresh_ms` |
/// | `MVR_WANDER_VEL`    | `sim.wander_vel`                    |
pub fn apply_env_overrides(cfg: &mut Config) {
    fn parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
        std::env::var(var).ok()?.trim().parse().ok()
    }
    if let Some(ms) = parsed("MVR_CYCLE_MS") {
        cfg.cycle.cycle_time_ms = ms;
    }
    if let Some(ms) = parsed("MVR_PRECEDENCE_MS") {
        cfg.cycle.direct_motion_precedence_ms = ms;
    }
    if let Some(ms) = parsed("MVR_REFRESH_MS") {
        cfg.cycle.state_reflection_refresh_ms = ms;
    }
    if let Some(vel) = parsed("MVR_WANDER_VEL") {
        cfg.sim.wander_vel = vel;
    }
}

pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mvr_kernel::MotionLimits;

    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.cycle.cycle_time_ms, 100);
        assert_eq!(loaded.cycle.limits, MotionLimits::default());
        assert_eq!(loaded.sim, SimConfig::default());
        assert_eq!(loaded.log_format, LogFormat::Compact);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "log_format = \"json\"\n[cycle]\ncommand_deadband = 2\n[cycle.limits.trans]\nmax_vel = 700.0\nmax_neg_vel = 100.0\nmax_accel = 500.0\nmax_decel = 900.0\n",
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.cycle.command_deadband, 2);
        assert_eq!(cfg.cycle.limits.trans.max_vel, 700.0);
        assert_eq!(cfg.cycle.limits.rot, MotionLimits::default().rot);
        assert_eq!(cfg.cycle.state_reflection_refresh_ms, 500);
        assert_eq!(cfg.sim.packet_period(), Duration::from_millis(20));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[cycle\ncycle_time_ms = ").expect("write");
        let err = load_from(&path).expect_err("parse must fail");
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_mvr_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.mvr/config.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn env_overrides_cycle_timing() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("MVR_CYCLE_MS", "50");
            std::env::set_var("MVR_PRECEDENCE_MS", "750");
            std::env::set_var("MVR_REFRESH_MS", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.cycle.cycle_time_ms, 50);
        assert_eq!(cfg.cycle.direct_motion_precedence_ms, 750);
        assert_eq!(cfg.cycle.state_reflection_refresh_ms, 500);
        unsafe {
            std::env::remove_var("MVR_CYCLE_MS");
            std::env::remove_var("MVR_PRECEDENCE_MS");
            std::env::remove_var("MVR_REFRESH_MS");
        }
    }

    #[test]
    fn env_overrides_wander_velocity() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("MVR_WANDER_VEL", "125.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.sim.wander_vel, 125.5);
        unsafe { std::env::remove_var("MVR_WANDER_VEL") };
    }
}
