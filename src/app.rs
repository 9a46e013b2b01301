use crate::audio::{AudioEngine, NullAudioEngine, RodioAudioEngine};
use crate::config;
use crate::core::PlaybackState;
use crate::model::{LibraryResult, PlayingState};
use crate::player::Player;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const HELP: &str =
    "Commands: play | pause | next | stop | shuffle | loop | pick <n> | list | status | help | quit";

#[derive(Debug, Default, Clone)]
pub struct AppOptions {
    pub music_dir: Option<PathBuf>,
    pub null_audio: bool,
}

pub fn run(options: AppOptions) -> Result<()> {
    let config = config::load_config()?;

    let engine: Box<dyn AudioEngine> = if options.null_audio {
        Box::new(NullAudioEngine::new())
    } else {
        match RodioAudioEngine::new() {
            Ok(engine) => Box::new(engine),
            Err(err) => {
                log::warn!("audio output unavailable, playing silently: {err:#}");
                Box::new(NullAudioEngine::new())
            }
        }
    };
    let player = Player::new(&config, engine);

    match options.music_dir.or_else(|| config.resolved_music_dir()) {
        Some(root) => {
            log::info!("scanning {}", root.display());
            let _scan = player.load_library(root)?;
        }
        None => player.apply_library(LibraryResult::Error(String::from(
            "no music folder configured",
        ))),
    }

    println!("{HELP}");
    let stdin = io::stdin();
    let mut out = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read command")?;
        if matches!(line.trim(), "quit" | "exit" | "q") {
            break;
        }
        writeln!(out, "{}", run_command(&player, &line))?;
        out.flush()?;
    }

    player.shutdown();
    Ok(())
}

/// Executes one console command and returns the status line to show.
pub fn run_command(player: &Player, raw: &str) -> String {
    let input = raw.trim();
    if input.is_empty() {
        return String::from("No command");
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => String::from(HELP),
        "play" => match player.snapshot().playing_state {
            PlayingState::Playing => String::from("Already playing"),
            _ => outcome(player, player.play_pause()),
        },
        "pause" => match player.snapshot().playing_state {
            PlayingState::Playing => outcome(player, player.play_pause()),
            _ => String::from("Nothing is playing"),
        },
        "next" => outcome(player, player.play_next()),
        "stop" => {
            player.stop();
            status_line(&player.snapshot())
        }
        "shuffle" => {
            let shuffle = player.toggle_shuffle();
            format!("Shuffle {}", if shuffle { "on" } else { "off" })
        }
        "loop" => format!("Loop mode {}", player.cycle_loop_state()),
        "pick" => pick(player, rest),
        "list" => list(&player.snapshot()),
        "status" => status_line(&player.snapshot()),
        other => format!("Unknown command: {other}"),
    }
}

fn pick(player: &Player, rest: &str) -> String {
    let Ok(number) = rest.parse::<usize>() else {
        return String::from("Usage: pick <n>");
    };
    let state = player.snapshot();
    let Some(song) = number.checked_sub(1).and_then(|idx| state.songs.get(idx)) else {
        return format!("No song #{number} ({} in library)", state.songs.len());
    };
    outcome(player, player.start_song(state.songs.clone(), Some(song.clone())))
}

fn outcome(player: &Player, result: Result<()>) -> String {
    match result {
        Ok(()) => status_line(&player.snapshot()),
        Err(err) => format!("playback error: {err:#}"),
    }
}

fn list(state: &PlaybackState) -> String {
    if state.songs_loading {
        return String::from("Library is loading");
    }
    if state.songs.is_empty() {
        return String::from("Library is empty");
    }

    state
        .songs
        .iter()
        .enumerate()
        .map(|(idx, song)| {
            let marker = match &state.playing {
                Some(playing) if playing.same_track(song) => '>',
                _ => ' ',
            };
            format!("{marker}{:>4}. {} - {}", idx + 1, song.artist, song.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn status_line(state: &PlaybackState) -> String {
    let track = match &state.playing {
        Some(song) => format!("{} - {}", song.artist, song.name),
        None => String::from("nothing"),
    };
    let mut line = format!(
        "{:?} {} [{}] shuffle {} | {}",
        state.playing_state,
        track,
        format_position(state.current_position),
        if state.shuffle { "on" } else { "off" },
        state.loop_state,
    );
    if state.songs_loading {
        line.push_str(" | loading library");
    }
    line
}

fn format_position(position_ms: u64) -> String {
    let seconds = position_ms / 1_000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
