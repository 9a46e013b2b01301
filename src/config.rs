use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::model::LoopState;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "qplayer";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub music_dir: Option<PathBuf>,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub loop_state: LoopState,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_completion_debounce_ms")]
    pub completion_debounce_ms: u64,
    #[serde(default = "default_fade_in_ms")]
    pub fade_in_ms: u64,
    #[serde(default = "default_position_tick_ms")]
    pub position_tick_ms: u64,
    /// Tag-parsing workers; 0 lets rayon pick.
    #[serde(default)]
    pub scan_threads: usize,
}

fn default_shuffle() -> bool {
    true
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_completion_debounce_ms() -> u64 {
    100
}

fn default_fade_in_ms() -> u64 {
    1
}

fn default_position_tick_ms() -> u64 {
    1_000
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            music_dir: None,
            shuffle: default_shuffle(),
            loop_state: LoopState::default(),
            history_capacity: default_history_capacity(),
            completion_debounce_ms: default_completion_debounce_ms(),
            fade_in_ms: default_fade_in_ms(),
            position_tick_ms: default_position_tick_ms(),
            scan_threads: 0,
        }
    }
}

impl PlayerConfig {
    pub fn completion_debounce(&self) -> Duration {
        Duration::from_millis(self.completion_debounce_ms)
    }

    pub fn fade_in(&self) -> Duration {
        Duration::from_millis(self.fade_in_ms)
    }

    pub fn position_tick(&self) -> Duration {
        Duration::from_millis(self.position_tick_ms.max(1))
    }

    /// Configured music folder, else `~/Music`.
    pub fn resolved_music_dir(&self) -> Option<PathBuf> {
        self.music_dir
            .clone()
            .or_else(|| home_dir().map(|home| home.join("Music")))
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("QPLAYER_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = home_dir().context("neither HOME nor USERPROFILE is set")?;
    Ok(home.join(".config").join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE))
}

pub fn load_config() -> Result<PlayerConfig> {
    load_config_from(&config_path()?)
}

pub fn save_config(config: &PlayerConfig) -> Result<PathBuf> {
    let path = config_path()?;
    save_config_to(&path, config)?;
    Ok(path)
}

fn load_config_from(path: &Path) -> Result<PlayerConfig> {
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(PlayerConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: PlayerConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

fn save_config_to(path: &Path, config: &PlayerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = PlayerConfig {
            loop_state: LoopState::PlayOne,
            shuffle: false,
            ..PlayerConfig::default()
        };
        save_config_to(&path, &config).expect("save");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().expect("tempdir");
        let loaded = load_config_from(&dir.path().join(CONFIG_FILE)).expect("load");
        assert_eq!(loaded, PlayerConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "loop_state": "PlayAll", "fade_in_ms": 250 }"#).expect("write");

        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.loop_state, LoopState::PlayAll);
        assert_eq!(loaded.fade_in(), Duration::from_millis(250));
        assert!(loaded.shuffle);
        assert_eq!(loaded.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(loaded.completion_debounce(), Duration::from_millis(100));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ nope").expect("write");

        let err = load_config_from(&path).expect_err("parse error");
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn explicit_music_dir_wins() {
        let config = PlayerConfig {
            music_dir: Some(PathBuf::from("/srv/music")),
            ..PlayerConfig::default()
        };
        assert_eq!(config.resolved_music_dir(), Some(PathBuf::from("/srv/music")));
    }
}
