//! Daemon settings – reads/writes `~/.brick/config.toml`.
//!
//! These are the settings of the `brickd` process itself.  The hardware
//! description (ports, device types, bus path) lives in its own file, named
//! by `hardware_config`, and is parsed by [`brick_hal::BrickConfig`].

use std::fs;
use std::path::{Path, PathBuf};

use brick_communicator::DEFAULT_PORT;
use brick_types::BrickError;

use crate::telemetry_server::DEFAULT_TELEMETRY_PORT;
use serde::{Deserialize, Serialize};

/// Interpreter that executes uploaded scripts.  Script text is fed on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

/// Persisted daemon configuration stored in `~/.brick/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the command socket.
    #[serde(default = "default_port")]
    pub communicator_port: u16,

    /// TCP port of the read-only telemetry socket.
    #[serde(default = "default_telemetry_port")]
    pub telemetry_port: u16,

    /// Directory that `file:` uploads land in and `run:` reads from.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Hardware description file; the brick starts with no devices when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_config: Option<PathBuf>,

    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_telemetry_port() -> u16 {
    DEFAULT_TELEMETRY_PORT
}
fn default_program() -> String {
    "node".to_string()
}
fn default_scripts_dir() -> PathBuf {
    brick_home(&home_dir()).join("scripts")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            communicator_port: default_port(),
            telemetry_port: default_telemetry_port(),
            scripts_dir: default_scripts_dir(),
            hardware_config: None,
            interpreter: InterpreterConfig::default(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn brick_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".brick")
}

/// Return the path to `~/.brick/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    brick_home(home).join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
///
/// # Errors
///
/// [`BrickError::Io`] if the file cannot be read, [`BrickError::Configuration`]
/// if it is not valid TOML for [`Config`].
pub fn load_from(path: &Path) -> Result<Option<Config>, BrickError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| BrickError::io(path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| BrickError::config("brickd", e.to_string()))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BRICK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BRICK_PORT` | `communicator_port` |
/// | `BRICK_TELEMETRY_PORT` | `telemetry_port` |
/// | `BRICK_SCRIPTS_DIR` | `scripts_dir` |
/// | `BRICK_HARDWARE_CONFIG` | `hardware_config` |
/// | `BRICK_INTERPRETER` | `interpreter.program` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup, so tests need
/// not mutate the process environment.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BRICK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.communicator_port = port;
    }
    if let Some(v) = lookup("BRICK_TELEMETRY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.telemetry_port = port;
    }
    if let Some(v) = lookup("BRICK_SCRIPTS_DIR") {
        cfg.scripts_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("BRICK_HARDWARE_CONFIG") {
        cfg.hardware_config = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("BRICK_INTERPRETER")
        && !v.trim().is_empty()
    {
        cfg.interpreter.program = v;
    }
}

/// Save the config, creating the parent directory if necessary.
///
/// # Errors
///
/// [`BrickError::Io`] on any filesystem failure.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BrickError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BrickError::io(parent.display(), e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BrickError::config("brickd", e.to_string()))?;
    fs::write(path, raw).map_err(|e| BrickError::io(path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_path_is_under_dot_brick() {
        let path = config_path_for_home("/home/robot");
        assert_eq!(path, PathBuf::from("/home/robot/.brick/config.toml"));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("load ok").is_none());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            communicator_port: 9999,
            telemetry_port: 9901,
            scripts_dir: dir.path().join("scripts"),
            hardware_config: Some(dir.path().join("brick.toml")),
            interpreter: InterpreterConfig {
                program: "qjs".to_string(),
                args: vec!["--std".to_string()],
            },
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.communicator_port, 9999);
        assert_eq!(loaded.telemetry_port, 9901);
        assert_eq!(loaded.interpreter.args, vec!["--std".to_string()]);
        assert_eq!(loaded.hardware_config, cfg.hardware_config);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let cfg: Config = toml::from_str("scripts_dir = \"/srv/scripts\"").expect("parse");
        assert_eq!(cfg.communicator_port, DEFAULT_PORT);
        assert_eq!(cfg.telemetry_port, DEFAULT_TELEMETRY_PORT);
        assert_eq!(cfg.scripts_dir, PathBuf::from("/srv/scripts"));
        assert_eq!(cfg.interpreter, InterpreterConfig::default());
        assert!(cfg.hardware_config.is_none());
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "communicator_port = \"high\"").expect("write");
        assert!(matches!(
            load_from(&path),
            Err(BrickError::Configuration { .. })
        ));
    }

    #[test]
    fn overrides_replace_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BRICK_PORT", "7000"),
            ("BRICK_TELEMETRY_PORT", "7001"),
            ("BRICK_SCRIPTS_DIR", "/tmp/scripts"),
            ("BRICK_HARDWARE_CONFIG", "/etc/brick.toml"),
            ("BRICK_INTERPRETER", "qjs"),
        ]);
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.communicator_port, 7000);
        assert_eq!(cfg.telemetry_port, 7001);
        assert_eq!(cfg.scripts_dir, PathBuf::from("/tmp/scripts"));
        assert_eq!(cfg.hardware_config, Some(PathBuf::from("/etc/brick.toml")));
        assert_eq!(cfg.interpreter.program, "qjs");
    }

    #[test]
    fn unparsable_port_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |key| (key == "BRICK_PORT").then(|| "lots".to_string()));
        assert_eq!(cfg.communicator_port, DEFAULT_PORT);
    }
}
