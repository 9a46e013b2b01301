use crate::model::{LibraryResult, Song};
use crate::tags;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Audio files under `root` as `(path, display name)` pairs, in walk order.
pub fn enumerate(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        anyhow::bail!("music folder {} is not a directory", root.display());
    }

    let files = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            (entry.into_path(), name)
        })
        .collect();
    Ok(files)
}

/// Tags every file on a bounded pool, then sorts by display name ignoring
/// case. `threads == 0` uses rayon's default width.
pub fn load_songs(root: &Path, threads: usize) -> Result<Vec<Song>> {
    let files = enumerate(root)?;
    log::debug!("tagging {} files under {}", files.len(), root.display());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed to start tag parsing pool")?;

    let mut songs: Vec<Song> = pool.install(|| {
        files
            .into_par_iter()
            .map(|(path, name)| {
                let artist = tags::parse_artist(&path);
                Song { path, name, artist }
            })
            .collect()
    });

    songs.sort_by_cached_key(|song| song.name.to_uppercase());
    Ok(songs)
}

pub fn scan(root: &Path, threads: usize) -> LibraryResult {
    match load_songs(root, threads) {
        Ok(songs) => {
            log::info!("found {} songs in {}", songs.len(), root.display());
            LibraryResult::Loaded(songs)
        }
        Err(err) => {
            log::warn!("library scan failed: {err:#}");
            LibraryResult::Error(format!("{err:#}"))
        }
    }
}

fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}
