use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One audio file on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub path: PathBuf,
    pub name: String,
    pub artist: String,
}

impl Song {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            artist: artist.into(),
        }
    }

    /// Two entries refer to the same file. Lookups key by path so that
    /// identically named songs in different folders stay distinct.
    pub fn same_track(&self, other: &Song) -> bool {
        self.path == other.path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayingState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoopState {
    #[default]
    LoopAll,
    LoopOne,
    PlayAll,
    PlayOne,
}

impl LoopState {
    pub fn next(self) -> Self {
        match self {
            Self::LoopAll => Self::LoopOne,
            Self::LoopOne => Self::PlayAll,
            Self::PlayAll => Self::PlayOne,
            Self::PlayOne => Self::LoopAll,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::LoopAll => "loop-all",
            Self::LoopOne => "loop-one",
            Self::PlayAll => "play-all",
            Self::PlayOne => "play-one",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LoopState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "loop-all" => Ok(Self::LoopAll),
            "loop-one" => Ok(Self::LoopOne),
            "play-all" => Ok(Self::PlayAll),
            "play-one" => Ok(Self::PlayOne),
            other => anyhow::bail!("unknown loop state {other}"),
        }
    }
}

/// Outcome of an asynchronous library fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryResult {
    Loading,
    Loaded(Vec<Song>),
    Error(String),
}

impl LibraryResult {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn into_songs(self) -> Vec<Song> {
        match self {
            Self::Loaded(songs) => songs,
            Self::Loading | Self::Error(_) => Vec::new(),
        }
    }
}
