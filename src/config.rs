//! Configuration management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level settings, loadable from `config.json` in the workspace
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// How to invoke the external PlatformIO toolchain
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolchainConfig {
    /// Executable plus leading arguments, e.g. `["pio"]` or
    /// `["python3", "-m", "platformio"]`
    #[serde(default = "default_pio_command")]
    pub command: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: default_pio_command(),
        }
    }
}

/// Locate the `pio` executable: explicit env var, then the standard
/// PlatformIO virtualenv location, then whatever is on PATH
fn default_pio_command() -> Vec<String> {
    if let Ok(cmd) = std::env::var("PIO_COMMAND") {
        return vec![cmd];
    }

    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            let pio = PathBuf::from(home).join(".platformio/penv/bin/pio");
            if pio.exists() {
                return vec![pio.to_string_lossy().into_owned()];
            }
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            let pio = PathBuf::from(home).join(".platformio\\penv\\Scripts\\pio.exe");
            if pio.exists() {
                return vec![pio.to_string_lossy().into_owned()];
            }
        }
    }

    vec!["pio".to_string()]
}

/// Workspace directory for generated projects and settings
/// (DEVICEFORGE_WORKSPACE or platform default)
pub fn workspace_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DEVICEFORGE_WORKSPACE") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/deviceforge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("deviceforge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share/deviceforge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("deviceforge");
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

/// Directory a single project's generated sources are materialized into
pub fn project_dir(project_name: &str) -> PathBuf {
    workspace_dir().join("projects").join(project_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_config_defaults_to_a_nonempty_command() {
        let config = ToolchainConfig::default();
        assert!(!config.command.is_empty());
    }

    #[test]
    fn toolchain_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(!config.toolchain.command.is_empty());
    }

    #[test]
    fn explicit_toolchain_command_round_trips() {
        let json = r#"{"toolchain":{"command":["python3","-m","platformio"]}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.toolchain.command,
            vec!["python3", "-m", "platformio"]
        );
    }

    #[test]
    fn project_dir_nests_under_the_workspace() {
        let dir = project_dir("blink");
        assert!(dir.ends_with("projects/blink"));
    }
}
