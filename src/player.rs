use crate::audio::AudioEngine;
use crate::config::PlayerConfig;
use crate::core::PlaybackState;
use crate::debounce::Debounce;
use crate::library;
use crate::model::{LibraryResult, LoopState, PlayingState, Song};
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Owns the one live [`PlaybackState`] and the engine that plays it.
///
/// Every transition runs under the state lock, so a read-modify-publish
/// sequence never interleaves with another. Lock order: state, rng, engine.
pub struct Player {
    state: Mutex<Arc<PlaybackState>>,
    revision: AtomicU64,
    rng: Mutex<SmallRng>,
    engine: Mutex<Box<dyn AudioEngine>>,
    completion: Mutex<Debounce>,
    fade_in: Duration,
    position_tick: Duration,
    scan_threads: usize,
    poller_active: AtomicBool,
    shutting_down: AtomicBool,
    this: Weak<Player>,
}

impl Player {
    pub fn new(config: &PlayerConfig, engine: Box<dyn AudioEngine>) -> Arc<Self> {
        Self::with_rng(config, engine, rand::make_rng())
    }

    pub fn with_seed(config: &PlayerConfig, engine: Box<dyn AudioEngine>, seed: u64) -> Arc<Self> {
        Self::with_rng(config, engine, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(config: &PlayerConfig, mut engine: Box<dyn AudioEngine>, rng: SmallRng) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Player>| {
            let player = this.clone();
            engine.set_completion_callback(Box::new(move || {
                if let Some(player) = player.upgrade() {
                    player.on_track_completed();
                }
            }));

            Self {
                state: Mutex::new(Arc::new(PlaybackState::new(
                    config.shuffle,
                    config.loop_state,
                    config.history_capacity,
                ))),
                revision: AtomicU64::new(0),
                rng: Mutex::new(rng),
                engine: Mutex::new(engine),
                completion: Mutex::new(Debounce::new(config.completion_debounce())),
                fade_in: config.fade_in(),
                position_tick: config.position_tick(),
                scan_threads: config.scan_threads,
                poller_active: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                this: this.clone(),
            }
        })
    }

    pub fn snapshot(&self) -> Arc<PlaybackState> {
        Arc::clone(&self.lock_state())
    }

    /// Bumped on every published snapshot.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn position_poller_running(&self) -> bool {
        self.poller_active.load(Ordering::Acquire)
    }

    pub fn apply_library(&self, result: LibraryResult) {
        let mut state = self.lock_state();
        let next = state.with_songs(result);
        self.publish(&mut state, next);
    }

    /// Publishes `Loading`, then scans `root` on a background thread.
    pub fn load_library(&self, root: PathBuf) -> Result<JoinHandle<()>> {
        let player = self.this.upgrade().context("player is gone")?;
        self.apply_library(LibraryResult::Loading);

        thread::Builder::new()
            .name(String::from("library-scan"))
            .spawn(move || {
                let result = library::scan(&root, player.scan_threads);
                player.apply_library(result);
            })
            .context("failed to spawn library scan")
    }

    pub fn start_song(&self, playlist: Vec<Song>, song: Option<Song>) -> Result<()> {
        let mut state = self.lock_state();
        self.start_locked(&mut state, playlist, song)
    }

    /// Pauses, resumes, or starts the library from the top when stopped.
    pub fn play_pause(&self) -> Result<()> {
        let mut state = self.lock_state();
        match state.playing_state {
            PlayingState::Playing => {
                self.lock_engine().pause();
                let next = state.toggle_playing_state(PlayingState::Paused, false);
                self.publish(&mut state, next);
                Ok(())
            }
            PlayingState::Paused => {
                {
                    let mut engine = self.lock_engine();
                    engine.apply_fade_in(self.fade_in);
                    engine.start().context("failed to resume playback")?;
                }
                let next = state.toggle_playing_state(PlayingState::Playing, false);
                self.publish(&mut state, next);
                drop(state);
                self.ensure_position_poller();
                Ok(())
            }
            PlayingState::Stopped => {
                let playlist = if state.playlist.is_empty() {
                    state.songs.clone()
                } else {
                    state.playlist.clone()
                };
                self.start_locked(&mut state, playlist, None)
            }
        }
    }

    pub fn play_next(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.advance_locked(&mut state)
    }

    fn advance_locked(&self, state: &mut MutexGuard<'_, Arc<PlaybackState>>) -> Result<()> {
        self.lock_engine().stop();

        let next = state.next(&mut self.lock_rng());
        let Some(song) = next.playing.clone() else {
            log::info!("end of play order");
            self.publish(state, next);
            return Ok(());
        };

        let played = self.lock_engine().play(song.path(), self.fade_in);
        match played {
            Ok(()) => {
                log::info!("playing {} - {}", song.artist, song.name);
                let next = next.toggle_playing_state(PlayingState::Playing, false);
                self.publish(state, next);
                self.ensure_position_poller();
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to start {}: {err:#}", song.path().display());
                let stopped = next.toggle_playing_state(PlayingState::Stopped, true);
                self.publish(state, stopped);
                Err(err).with_context(|| format!("failed to start {}", song.name))
            }
        }
    }

    pub fn stop(&self) {
        let mut state = self.lock_state();
        self.lock_engine().stop();
        let next = state.toggle_playing_state(PlayingState::Stopped, true);
        self.publish(&mut state, next);
    }

    pub fn toggle_shuffle(&self) -> bool {
        let mut state = self.lock_state();
        let next = state.toggle_shuffle(!state.shuffle, &mut self.lock_rng());
        let shuffle = next.shuffle;
        self.publish(&mut state, next);
        shuffle
    }

    pub fn cycle_loop_state(&self) -> LoopState {
        let mut state = self.lock_state();
        let next = state.cycle_loop_state();
        let loop_state = next.loop_state;
        self.publish(&mut state, next);
        loop_state
    }

    /// Engine end-of-track entry point. Duplicate signals inside the debounce
    /// window are dropped.
    pub fn on_track_completed(&self) {
        let accepted = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accept();
        if !accepted {
            log::debug!("duplicate completion signal ignored");
            return;
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.lock_state();
        if state.playing_state != PlayingState::Playing {
            log::debug!("completion signal while not playing ignored");
            return;
        }
        if let Err(err) = self.advance_locked(&mut state) {
            log::warn!("auto-advance failed: {err:#}");
        }
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.lock_engine().stop();
    }

    fn start_locked(
        &self,
        state: &mut MutexGuard<'_, Arc<PlaybackState>>,
        playlist: Vec<Song>,
        song: Option<Song>,
    ) -> Result<()> {
        let next = state.start(playlist, song, &mut self.lock_rng());
        let Some(song) = next.playing.clone() else {
            log::debug!("nothing to play");
            self.lock_engine().stop();
            self.publish(state, next);
            return Ok(());
        };

        if let Err(err) = self.lock_engine().play(song.path(), self.fade_in) {
            log::warn!("failed to start {}: {err:#}", song.path().display());
            let stopped = state.toggle_playing_state(PlayingState::Stopped, true);
            self.publish(state, stopped);
            return Err(err).with_context(|| format!("failed to start {}", song.name));
        }

        log::info!("playing {} - {}", song.artist, song.name);
        self.publish(state, next);
        self.ensure_position_poller();
        Ok(())
    }

    fn publish(&self, state: &mut MutexGuard<'_, Arc<PlaybackState>>, next: PlaybackState) {
        **state = Arc::new(next);
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!(
            "revision {revision}: {:?} {:?}",
            state.playing_state,
            state.playing.as_ref().map(|song| song.name.as_str())
        );
    }

    fn ensure_position_poller(&self) {
        if self.poller_active.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(player) = self.this.upgrade() else {
            self.poller_active.store(false, Ordering::Release);
            return;
        };

        let spawned = thread::Builder::new()
            .name(String::from("position-poller"))
            .spawn(move || player.poll_position());
        if let Err(err) = spawned {
            log::warn!("failed to spawn position poller: {err}");
            self.poller_active.store(false, Ordering::Release);
        }
    }

    fn poll_position(&self) {
        loop {
            while self.should_poll() {
                let position = self.publish_position();
                thread::sleep(until_next_tick(position, self.position_tick));
            }
            // Leave the position where playback halted.
            self.publish_position();

            self.poller_active.store(false, Ordering::Release);
            // A transition into PLAYING may have seen the guard still set.
            if !self.should_poll() || self.poller_active.swap(true, Ordering::AcqRel) {
                break;
            }
        }
    }

    fn should_poll(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire)
            && self.snapshot().playing_state == PlayingState::Playing
    }

    fn publish_position(&self) -> u64 {
        let mut state = self.lock_state();
        let position = self.lock_engine().position_ms();
        if position != state.current_position {
            let next = state.with_current_position(position);
            self.publish(&mut state, next);
        }
        position
    }

    fn lock_state(&self) -> MutexGuard<'_, Arc<PlaybackState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rng(&self) -> MutexGuard<'_, SmallRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_engine(&self) -> MutexGuard<'_, Box<dyn AudioEngine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn until_next_tick(position_ms: u64, tick: Duration) -> Duration {
    let tick_ms = (tick.as_millis() as u64).max(1);
    Duration::from_millis(tick_ms - position_ms % tick_ms)
}
