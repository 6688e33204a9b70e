use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::candidates::{DEFAULT_SCORE_WINDOW, DEFAULT_WIDTH};
use crate::db::DedupConfig;
use crate::db::models::BassStyle;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories searched for session files (used when no CLI path is given).
    pub source_dirs: Vec<PathBuf>,
    /// Style used when a command gets no `--style`.
    pub default_style: BassStyle,
    pub generation: GenerationConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Candidates kept per (bar, size) slot.
    pub width: usize,
    /// Candidates scoring within this many points of a group's best are shuffled. 0 = never.
    pub score_window: f32,
    /// Fixed RNG seed for reproducible lines.
    pub seed: Option<u64>,
    /// Number of parallel scoring workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Never place the same fragment twice in one line.
    pub no_repeat: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            score_window: DEFAULT_SCORE_WINDOW,
            seed: None,
            workers: 0,
            no_repeat: true,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/walkingbass/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.generation.workers > 0 {
            self.generation.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Session directories: configured ones, else the XDG data dir's `sessions`.
    pub fn resolve_source_dirs(&self) -> Vec<PathBuf> {
        if !self.source_dirs.is_empty() {
            return self.source_dirs.clone();
        }
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| vec![dirs.data_dir().join("sessions")])
            .unwrap_or_default()
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
