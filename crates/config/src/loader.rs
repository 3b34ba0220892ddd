use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::CourierConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<CourierConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/courier/courier.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CourierConfig::default()` if no config file is found or the one
/// found fails to parse. Env overrides are applied either way.
pub fn discover_and_load() -> CourierConfig {
    let mut cfg = match find_config_file(Path::new(".")) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                CourierConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            CourierConfig::default()
        },
    };
    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg
}

/// Find the first config file under `local_dir`, then in the user config dir.
fn find_config_file(local_dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| local_dir.join(name))
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/courier/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Apply `COURIER_*` overrides on top of file values.
///
/// Unparseable numeric overrides are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut CourierConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("COURIER_DATABASE_URL").filter(|v| !v.is_empty()) {
        cfg.storage.database_url = url;
    }
    if let Some(v) = lookup("COURIER_RECONCILE_INTERVAL_SECS") {
        match v.parse() {
            Ok(secs) => cfg.scheduler.reconcile_interval_secs = secs,
            Err(_) => warn!(value = %v, "ignoring invalid COURIER_RECONCILE_INTERVAL_SECS"),
        }
    }
    if let Some(v) = lookup("COURIER_LOOKAHEAD_HOURS") {
        match v.parse() {
            Ok(hours) => cfg.scheduler.lookahead_hours = hours,
            Err(_) => warn!(value = %v, "ignoring invalid COURIER_LOOKAHEAD_HOURS"),
        }
    }
    if let Some(v) = lookup("COURIER_METRICS_ENABLED") {
        cfg.metrics.enabled = matches!(v.as_str(), "1" | "true" | "yes" | "on");
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).with_context(|| format!("parse {}", path.display())),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
