//! Layered engine configuration and the persisted capability grant file.
//!
//! Every knob in [`EngineConfig`] resolves through the same precedence:
//! explicit override > environment variable > config file value > built-in
//! default (§3 "Engine configuration"). The core crate never reads
//! `std::env::args` and never installs a logging subscriber — both are the
//! host application's job (§9 "Library, not a binary").

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, GrantSet};
use crate::error::RegletError;

const DEFAULT_MAX_CONCURRENT_CONTROLS: usize = 10;
const DEFAULT_MAX_CONCURRENT_OBSERVATIONS: usize = 5;
const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PLUGIN_MEMORY_PAGES: u32 = 256;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// The resolved, ready-to-use engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_controls: usize,
    pub max_concurrent_observations: usize,
    pub default_control_timeout: Duration,
    pub default_plugin_memory_pages: u32,
    pub http_body_limit_bytes: usize,
    pub http_client_timeout: Duration,
    pub plugin_dir: PathBuf,
    pub config_path: PathBuf,
    pub trust_all_plugins: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent_controls: DEFAULT_MAX_CONCURRENT_CONTROLS,
            max_concurrent_observations: DEFAULT_MAX_CONCURRENT_OBSERVATIONS,
            default_control_timeout: DEFAULT_CONTROL_TIMEOUT,
            default_plugin_memory_pages: DEFAULT_PLUGIN_MEMORY_PAGES,
            http_body_limit_bytes: DEFAULT_HTTP_BODY_LIMIT_BYTES,
            http_client_timeout: DEFAULT_HTTP_CLIENT_TIMEOUT,
            plugin_dir: PathBuf::from("plugins"),
            config_path: default_config_path(),
            trust_all_plugins: false,
        }
    }
}

/// Explicit overrides a host application (the CLI) may supply. Every
/// field left `None` falls through to the env var / file / default chain.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigOverrides {
    pub max_concurrent_controls: Option<usize>,
    pub max_concurrent_observations: Option<usize>,
    pub default_control_timeout: Option<Duration>,
    pub default_plugin_memory_pages: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub http_client_timeout: Option<Duration>,
    pub plugin_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub trust_all_plugins: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    capabilities: Vec<Capability>,
    #[serde(default)]
    engine: EngineFileSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct EngineFileSection {
    max_concurrent_controls: Option<usize>,
    max_concurrent_observations: Option<usize>,
    default_control_timeout: Option<String>,
    default_plugin_memory_pages: Option<u32>,
    http_body_limit_bytes: Option<usize>,
    http_client_timeout: Option<String>,
    plugin_dir: Option<PathBuf>,
    trust_all_plugins: Option<bool>,
}

fn default_config_path() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".reglet").join("config.yaml")
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        std::env::var_os("HOME").map(PathBuf::from)
    }
    #[cfg(not(unix))]
    {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, RegletError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str(&contents).map_err(|e| RegletError::config(format!("failed to parse config file '{}': {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(RegletError::config(format!("failed to read config file '{}': {e}", path.display()))),
    }
}

fn layered<T: FromStr>(explicit: Option<T>, env_var: &str, file_value: Option<T>, default: T) -> T {
    if let Some(value) = explicit {
        return value;
    }
    if let Ok(raw) = std::env::var(env_var) {
        if let Ok(value) = raw.parse::<T>() {
            return value;
        }
    }
    file_value.unwrap_or(default)
}

fn layered_duration(explicit: Option<Duration>, env_var: &str, file_value: Option<&str>, default: Duration) -> Duration {
    if let Some(value) = explicit {
        return value;
    }
    if let Ok(raw) = std::env::var(env_var) {
        if let Ok(value) = humantime::parse_duration(&raw) {
            return value;
        }
    }
    file_value.and_then(|s| humantime::parse_duration(s).ok()).unwrap_or(default)
}

/// `plugin_dir` resolution order (§3): explicit override, then cwd's
/// `plugins/`, then the executable's parent's sibling `plugins/`.
fn resolve_plugin_dir(explicit: Option<PathBuf>, file_value: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit.or(file_value) {
        return dir;
    }
    let cwd_plugins = PathBuf::from("plugins");
    if cwd_plugins.is_dir() {
        return cwd_plugins;
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent().and_then(Path::parent) {
            return parent.join("plugins");
        }
    }
    cwd_plugins
}

/// Resolve the full layered configuration. Reads `config_path`'s file, if
/// any, but never writes it.
pub fn load(overrides: &EngineConfigOverrides) -> Result<EngineConfig, RegletError> {
    let config_path = overrides
        .config_path
        .clone()
        .or_else(|| std::env::var_os("REGLET_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path);

    let file = read_config_file(&config_path)?;
    let engine = &file.engine;

    Ok(EngineConfig {
        max_concurrent_controls: layered(
            overrides.max_concurrent_controls,
            "REGLET_MAX_CONCURRENT_CONTROLS",
            engine.max_concurrent_controls,
            DEFAULT_MAX_CONCURRENT_CONTROLS,
        ),
        max_concurrent_observations: layered(
            overrides.max_concurrent_observations,
            "REGLET_MAX_CONCURRENT_OBSERVATIONS",
            engine.max_concurrent_observations,
            DEFAULT_MAX_CONCURRENT_OBSERVATIONS,
        ),
        default_control_timeout: layered_duration(
            overrides.default_control_timeout,
            "REGLET_DEFAULT_CONTROL_TIMEOUT",
            engine.default_control_timeout.as_deref(),
            DEFAULT_CONTROL_TIMEOUT,
        ),
        default_plugin_memory_pages: layered(
            overrides.default_plugin_memory_pages,
            "REGLET_DEFAULT_PLUGIN_MEMORY_PAGES",
            engine.default_plugin_memory_pages,
            DEFAULT_PLUGIN_MEMORY_PAGES,
        ),
        http_body_limit_bytes: layered(
            overrides.http_body_limit_bytes,
            "REGLET_HTTP_BODY_LIMIT_BYTES",
            engine.http_body_limit_bytes,
            DEFAULT_HTTP_BODY_LIMIT_BYTES,
        ),
        http_client_timeout: layered_duration(
            overrides.http_client_timeout,
            "REGLET_HTTP_CLIENT_TIMEOUT",
            engine.http_client_timeout.as_deref(),
            DEFAULT_HTTP_CLIENT_TIMEOUT,
        ),
        plugin_dir: resolve_plugin_dir(overrides.plugin_dir.clone(), engine.plugin_dir.clone()),
        trust_all_plugins: layered(overrides.trust_all_plugins, "REGLET_TRUST_ALL_PLUGINS", engine.trust_all_plugins, false),
        config_path,
    })
}

/// Load the persisted capability grant set from `path` (§3, §6).
/// A missing file is not an error: it means no grants are persisted yet.
pub fn load_grants(path: &Path) -> Result<GrantSet, RegletError> {
    let file = read_config_file(path)?;
    Ok(file.capabilities.into_iter().collect())
}

/// Persist `grants` to `path` as YAML, mode 0600 with parent dir 0755
/// (§4.7 step 9, Ambient testing requirements).
pub fn save_grants(path: &Path, grants: &GrantSet) -> Result<(), RegletError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RegletError::config(format!("failed to create config dir '{}': {e}", parent.display())))?;
        set_permissions(parent, 0o755)?;
    }

    let mut capabilities: Vec<Capability> = grants.iter().cloned().collect();
    capabilities.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    let file = ConfigFile { capabilities, engine: EngineFileSection::default() };
    let yaml = serde_yaml::to_string(&file).map_err(|e| RegletError::config(format!("failed to serialize grant file: {e}")))?;
    std::fs::write(path, yaml).map_err(|e| RegletError::config(format!("failed to write grant file '{}': {e}", path.display())))?;
    set_permissions(path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), RegletError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| RegletError::config(format!("failed to set permissions on '{}': {e}", path.display())))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), RegletError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityKind;

    #[test]
    fn explicit_override_beats_everything() {
        std::env::set_var("REGLET_TEST_MAX_CONCURRENT_CONTROLS", "7");
        let value = layered(Some(99usize), "REGLET_TEST_MAX_CONCURRENT_CONTROLS", Some(5), 10);
        assert_eq!(value, 99);
        std::env::remove_var("REGLET_TEST_MAX_CONCURRENT_CONTROLS");
    }

    #[test]
    fn env_var_beats_file_and_default() {
        std::env::set_var("REGLET_TEST_ENV_BEATS_FILE", "7");
        let value = layered::<usize>(None, "REGLET_TEST_ENV_BEATS_FILE", Some(5), 10);
        assert_eq!(value, 7);
        std::env::remove_var("REGLET_TEST_ENV_BEATS_FILE");
    }

    #[test]
    fn file_value_beats_default() {
        let value = layered::<usize>(None, "REGLET_TEST_UNSET_VAR_XYZ", Some(5), 10);
        assert_eq!(value, 5);
    }

    #[test]
    fn default_is_used_when_nothing_else_present() {
        let value = layered::<usize>(None, "REGLET_TEST_UNSET_VAR_ABC", None, 10);
        assert_eq!(value, 10);
    }

    #[test]
    fn grant_file_round_trips_and_is_mode_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut grants = GrantSet::new();
        grants.insert(Capability::new(CapabilityKind::Network, "outbound:443"));
        grants.insert(Capability::new(CapabilityKind::Fs, "read:/etc/**"));

        save_grants(&path, &grants).unwrap();
        let loaded = load_grants(&path).unwrap();
        assert_eq!(loaded, grants);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn missing_grant_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.yaml");
        assert!(load_grants(&path).unwrap().is_empty());
    }
}
