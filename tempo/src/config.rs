use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tempo_ipc::SOCKET_PATH;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    /// Defaults to `state.json` in the platform data directory
    pub state_path: Option<PathBuf>,
    pub log_level: String,
    pub resume_on_restart: bool,
    pub focus: Focus,
    pub completion: Completion,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Focus {
    /// Subjects containing any of these get focus mode
    pub subjects: Vec<String>,
    /// Program run as `<hook> enter <subject>` / `<hook> exit <subject> <reason>`
    pub hook: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Completion {
    pub redirect_url: Option<String>,
    pub opener: String,
    pub desktop_notification: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(SOCKET_PATH),
            state_path: None,
            log_level: "info".to_string(),
            resume_on_restart: false,
            focus: Focus::default(),
            completion: Completion::default(),
        }
    }
}

impl Default for Focus {
    fn default() -> Self {
        Self {
            subjects: vec!["youtube.com".to_string()],
            hook: None,
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self {
            redirect_url: None,
            opener: "xdg-open".to_string(),
            desktop_notification: true,
        }
    }
}

pub fn load_config() -> Result<Config> {
    match ProjectDirs::from("com", "tempo", "tempo") {
        Some(proj_dirs) => {
            let path = proj_dirs.config_dir().join("tempo.toml");
            if path.exists() {
                load_from(&path)
            } else {
                Ok(Config::default())
            }
        }
        None => Ok(Config::default()),
    }
}

pub fn load_from(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file at {:?}", path))
}
