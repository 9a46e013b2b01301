use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const COMPLETION_POLL: Duration = Duration::from_millis(50);

pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;
type SharedCallback = Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>;

/// Command surface of a media player the scheduler can drive.
///
/// The sequence for a new track is `reset`, `set_source`, `apply_fade_in`,
/// `prepare`, `start`; `start` after `pause` resumes.
pub trait AudioEngine: Send {
    fn reset(&mut self);
    fn set_source(&mut self, path: &Path) -> Result<()>;
    fn prepare(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> Option<u64>;
    fn is_playing(&self) -> bool;
    /// Registered once; may be invoked from any thread, possibly more than
    /// once per finished track.
    fn set_completion_callback(&mut self, callback: CompletionCallback);
    /// Ramp from silence to full volume at the next `start`. The rodio
    /// engine only ramps freshly prepared tracks.
    fn apply_fade_in(&mut self, duration: Duration);

    fn play(&mut self, path: &Path, fade_in: Duration) -> Result<()> {
        self.reset();
        self.set_source(path)?;
        self.apply_fade_in(fade_in);
        self.prepare()?;
        self.start()
    }
}

fn fire(callback: &SharedCallback) {
    let current = callback
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(callback) = current {
        callback();
    }
}

/// The rodio queue of the current track plus whether its end should be
/// reported. Both change under one lock.
struct Output {
    player: rodio::Player,
    armed: bool,
}

impl Output {
    fn new(player: rodio::Player) -> Self {
        Self {
            player,
            armed: false,
        }
    }

    /// Disarms and returns true when an armed track has drained.
    fn take_finished(&mut self) -> bool {
        if self.armed && self.player.empty() && !self.player.is_paused() {
            self.armed = false;
            return true;
        }
        false
    }
}

pub struct RodioAudioEngine {
    sink: MixerDeviceSink,
    output: Arc<Mutex<Output>>,
    source: Option<PathBuf>,
    track_duration: Option<Duration>,
    fade_in: Duration,
    alive: Arc<AtomicBool>,
    callback: SharedCallback,
}

impl RodioAudioEngine {
    pub fn new() -> Result<Self> {
        let sink = open_device_sink()?;
        let output = Arc::new(Mutex::new(Output::new(rodio::Player::connect_new(
            sink.mixer(),
        ))));
        let alive = Arc::new(AtomicBool::new(true));
        let callback: SharedCallback = Arc::new(Mutex::new(None));

        spawn_completion_watcher(
            Arc::clone(&output),
            Arc::clone(&alive),
            Arc::clone(&callback),
        );

        Ok(Self {
            sink,
            output,
            source: None,
            track_duration: None,
            fade_in: Duration::ZERO,
            alive,
            callback,
        })
    }

    fn output(&self) -> MutexGuard<'_, Output> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_completion_watcher(
    output: Arc<Mutex<Output>>,
    alive: Arc<AtomicBool>,
    callback: SharedCallback,
) {
    thread::spawn(move || {
        while alive.load(Ordering::Acquire) {
            thread::sleep(COMPLETION_POLL);
            let finished = output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take_finished();
            if finished {
                fire(&callback);
            }
        }
    });
}

impl Drop for RodioAudioEngine {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.output().player.stop();
    }
}

impl AudioEngine for RodioAudioEngine {
    fn reset(&mut self) {
        let fresh = rodio::Player::connect_new(self.sink.mixer());
        let mut output = self.output();
        output.player.stop();
        *output = Output::new(fresh);
        drop(output);
        self.source = None;
        self.track_duration = None;
    }

    fn set_source(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            anyhow::bail!("track not found {}", path.display());
        }
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let path = self.source.clone().context("no source set")?;
        let file =
            File::open(&path).with_context(|| format!("failed to open track {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        self.track_duration = source.total_duration();

        let fade_in = std::mem::take(&mut self.fade_in);
        let output = self.output();
        output.player.pause();
        output.player.append(source.fade_in(fade_in));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.source.is_none() {
            anyhow::bail!("no prepared track");
        }
        let mut output = self.output();
        output.player.play();
        output.armed = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.output().player.pause();
    }

    fn stop(&mut self) {
        let mut output = self.output();
        output.armed = false;
        output.player.stop();
        drop(output);
        self.source = None;
        self.track_duration = None;
    }

    fn position_ms(&self) -> u64 {
        if self.source.is_none() {
            return 0;
        }
        self.output().player.get_pos().as_millis() as u64
    }

    fn duration_ms(&self) -> Option<u64> {
        self.track_duration.map(|duration| duration.as_millis() as u64)
    }

    fn is_playing(&self) -> bool {
        let output = self.output();
        self.source.is_some() && !output.player.is_paused() && !output.player.empty()
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(callback));
    }

    fn apply_fade_in(&mut self, duration: Duration) {
        self.fade_in = duration;
    }
}

fn open_device_sink() -> Result<MixerDeviceSink> {
    let mut sink = with_silenced_stderr(|| -> Result<MixerDeviceSink> {
        let default_err = match DeviceSinkBuilder::from_default_device()
            .context("failed to open default system output device")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_sink_or_fallback()
                    .context("failed to start default output stream")
            }) {
            Ok(sink) => return Ok(sink),
            Err(err) => err,
        };

        let host = rodio::cpal::default_host();
        let devices = host
            .output_devices()
            .context("failed to enumerate output devices")?;
        for device in devices {
            let name = device
                .description()
                .map(|description| description.name().to_string())
                .unwrap_or_default();
            let opened = DeviceSinkBuilder::from_device(device)
                .context("failed to open fallback output device")
                .and_then(|builder| {
                    builder
                        .with_error_callback(|_| {})
                        .open_sink_or_fallback()
                        .context("failed to start fallback output stream")
                });
            match opened {
                Ok(sink) => {
                    log::info!("default output failed, using {name}");
                    return Ok(sink);
                }
                Err(err) => log::debug!("output device {name} unavailable: {err:#}"),
            }
        }

        Err(default_err).context("unable to start any audio output stream")
    })?;
    sink.log_on_drop(false);
    Ok(sink)
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Fires the completion callback registered with a [`NullAudioEngine`].
#[derive(Clone)]
pub struct CompletionTrigger(SharedCallback);

impl CompletionTrigger {
    pub fn fire(&self) {
        fire(&self.0);
    }

    /// Reproduces backends that report one finished track twice.
    pub fn fire_twice(&self) {
        self.fire();
        self.fire();
    }
}

/// Device-less engine that only keeps a logical clock.
pub struct NullAudioEngine {
    source: Option<PathBuf>,
    prepared: bool,
    playing: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    fade_ins: usize,
    callback: SharedCallback,
}

impl NullAudioEngine {
    pub fn new() -> Self {
        Self {
            source: None,
            prepared: false,
            playing: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            fade_ins: 0,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_track_duration(mut self, duration: Duration) -> Self {
        self.track_duration = Some(duration);
        self
    }

    pub fn completion_trigger(&self) -> CompletionTrigger {
        CompletionTrigger(Arc::clone(&self.callback))
    }

    pub fn current_source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn fade_in_count(&self) -> usize {
        self.fade_ins
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if let Some(started_at) = self.started_at {
            position = position.saturating_add(started_at.elapsed());
        }
        match self.track_duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

impl Default for NullAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for NullAudioEngine {
    fn reset(&mut self) {
        self.source = None;
        self.prepared = false;
        self.playing = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
    }

    fn set_source(&mut self, path: &Path) -> Result<()> {
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if self.source.is_none() {
            anyhow::bail!("no source set");
        }
        self.prepared = true;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.prepared {
            anyhow::bail!("no prepared track");
        }
        if !self.playing {
            self.started_at = Some(Instant::now());
            self.playing = true;
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.playing = false;
    }

    fn stop(&mut self) {
        self.reset();
    }

    fn position_ms(&self) -> u64 {
        if self.source.is_none() {
            return 0;
        }
        self.current_position().as_millis() as u64
    }

    fn duration_ms(&self) -> Option<u64> {
        self.track_duration.map(|duration| duration.as_millis() as u64)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(callback));
    }

    fn apply_fade_in(&mut self, _duration: Duration) {
        self.fade_ins += 1;
    }
}
