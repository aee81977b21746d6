use chrono::{DateTime, Timelike, Utc};
use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::encoder::Transmitter;
use crate::library::list_tracks;
use crate::schedule::{eligible_tracks, parse_hour, BroadcastWindow};
use crate::select::{select_track, Selection};
use crate::store::MetadataStore;

/// Timing and location settings for the scheduling loop
#[derive(Debug, Clone)]
pub struct DjSettings {
    pub music_dir: PathBuf,
    pub startup_delay: Duration,
    pub idle_interval: Duration,
    pub cooldown: Duration,
    pub use_utc: bool,
}

impl DjSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            music_dir: config.music_dir.clone(),
            startup_delay: config.dj.startup_delay(),
            idle_interval: config.dj.idle_interval(),
            cooldown: config.dj.cooldown(),
            use_utc: config.dj.use_utc,
        }
    }
}

/// Current hour of day, 0..=23
pub type HourClock = Box<dyn Fn() -> u8 + Send>;

pub fn local_hour() -> u8 {
    chrono::Local::now().hour() as u8
}

pub fn utc_hour() -> u8 {
    Utc::now().hour() as u8
}

/// Hour given on the command line, or the current hour on the loop's clock
pub fn resolve_hour(arg: Option<&str>, use_utc: bool) -> Result<u8, String> {
    match arg {
        Some(text) => parse_hour(text)?.ok_or_else(|| "hour must not be empty".to_string()),
        None if use_utc => Ok(utc_hour()),
        None => Ok(local_hour()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DjState {
    /// Waiting out the startup delay
    Starting,
    /// Library is empty
    Idle,
    Selecting,
    Transmitting,
    /// Waiting after a failed transmission or a loop restart
    Cooldown,
}

/// Observable snapshot of the scheduling loop
#[derive(Debug, Clone, Serialize)]
pub struct DjStatus {
    pub state: DjState,
    pub current_track: Option<String>,
    pub current_is_fallback: bool,
    pub tracks_played: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub restarts: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DjStatus {
    fn default() -> Self {
        Self {
            state: DjState::Starting,
            current_track: None,
            current_is_fallback: false,
            tracks_played: 0,
            failures: 0,
            fallbacks: 0,
            restarts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Shared handle to the loop status, cheap to clone into API state
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<DjStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DjStatus {
        self.lock().clone()
    }

    // A panic while holding the lock must not take the loop down with it
    fn lock(&self) -> MutexGuard<'_, DjStatus> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F: FnOnce(&mut DjStatus)>(&self, f: F) {
        let mut status = self.lock();
        f(&mut status);
        status.updated_at = Utc::now();
    }

    fn set_state(&self, state: DjState) {
        self.update(|s| {
            s.state = state;
            if state != DjState::Transmitting {
                s.current_track = None;
                s.current_is_fallback = false;
            }
        });
    }

    fn begin_transmit(&self, selection: &Selection) {
        self.update(|s| {
            s.state = DjState::Transmitting;
            s.current_track = Some(selection.track().to_string());
            s.current_is_fallback = selection.is_fallback();
            if selection.is_fallback() {
                s.fallbacks += 1;
            }
        });
    }

    fn record_success(&self) {
        self.update(|s| s.tracks_played += 1);
    }

    fn record_failure(&self, reason: String) {
        self.update(|s| {
            s.failures += 1;
            s.last_error = Some(reason);
            s.state = DjState::Cooldown;
            s.current_track = None;
            s.current_is_fallback = false;
        });
    }

    fn record_restart(&self, reason: String) {
        self.update(|s| {
            s.restarts += 1;
            s.last_error = Some(reason);
            s.state = DjState::Cooldown;
            s.current_track = None;
            s.current_is_fallback = false;
        });
    }
}

/// What one pass through the loop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// No tracks on disk, waited the idle interval
    Idle,
    /// Track was streamed to the end
    Played(Selection),
    /// Transmission failed, waited the cooldown
    Failed { selection: Selection, reason: String },
}

/// The scheduling loop
///
/// Library and metadata are re-read on every pass so uploads and deletes take
/// effect at the next track boundary without notifying the loop.
pub struct Dj<T: Transmitter, R: Rng> {
    settings: DjSettings,
    store: Arc<MetadataStore>,
    transmitter: T,
    rng: R,
    clock: HourClock,
    status: StatusHandle,
}

impl<T: Transmitter, R: Rng> Dj<T, R> {
    pub fn new(
        settings: DjSettings,
        store: Arc<MetadataStore>,
        transmitter: T,
        rng: R,
        status: StatusHandle,
    ) -> Self {
        let clock: HourClock = if settings.use_utc {
            Box::new(utc_hour)
        } else {
            Box::new(local_hour)
        };
        Self {
            settings,
            store,
            transmitter,
            rng,
            clock,
            status,
        }
    }

    /// Replace the wall clock, e.g. to pin the hour in tests
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> u8 + Send + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Run one selection cycle, including any idle or cooldown wait
    pub fn run_once(&mut self) -> Cycle {
        let tracks = list_tracks(&self.settings.music_dir);
        if tracks.is_empty() {
            info!(
                "No music files found in {}. Sleeping {:?}...",
                self.settings.music_dir.display(),
                self.settings.idle_interval
            );
            self.status.set_state(DjState::Idle);
            thread::sleep(self.settings.idle_interval);
            return Cycle::Idle;
        }

        self.status.set_state(DjState::Selecting);
        let playlist = self.store.load();
        let hour = (self.clock)();
        let eligible = eligible_tracks(&tracks, &playlist, hour);
        if eligible.is_empty() {
            warn!(
                "No valid songs for current hour ({}). Playing fallback from all {} tracks",
                hour,
                tracks.len()
            );
        }

        let selection = match select_track(&eligible, &tracks, &mut self.rng) {
            Some(selection) => selection,
            // tracks is non-empty, so the fallback always has a candidate
            None => {
                self.status.set_state(DjState::Idle);
                thread::sleep(self.settings.idle_interval);
                return Cycle::Idle;
            }
        };

        let path = self.settings.music_dir.join(selection.track());
        info!(
            "Now playing: {} ({} of {} tracks eligible at hour {})",
            selection.track(),
            eligible.len(),
            tracks.len(),
            hour
        );
        self.status.begin_transmit(&selection);

        match self.transmitter.transmit(&path) {
            Ok(()) => {
                self.status.record_success();
                Cycle::Played(selection)
            }
            Err(e) => {
                let reason = e.to_string();
                error!("Error streaming {}: {}", path.display(), reason);
                self.status.record_failure(reason.clone());
                thread::sleep(self.settings.cooldown);
                Cycle::Failed { selection, reason }
            }
        }
    }

    /// Cycle forever; only returns by unwinding
    fn run_cycles(&mut self) {
        loop {
            self.run_once();
        }
    }
}

/// Start the scheduling loop on its own thread, restarting it if it panics
///
/// The thread lives as long as the process. The startup delay is applied
/// once; after a panic the loop resumes following the cooldown.
pub fn spawn_supervised<T, R>(mut dj: Dj<T, R>) -> std::io::Result<JoinHandle<()>>
where
    T: Transmitter + 'static,
    R: Rng + Send + 'static,
{
    thread::Builder::new()
        .name("dj-loop".to_string())
        .spawn(move || {
            info!(
                "DJ loop started, waiting {:?} for the broadcast server...",
                dj.settings.startup_delay
            );
            dj.status.set_state(DjState::Starting);
            thread::sleep(dj.settings.startup_delay);

            loop {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| dj.run_cycles()));
                if let Err(payload) = outcome {
                    let reason = format!("DJ loop panicked: {}", panic_message(payload.as_ref()));
                    error!("{}, restarting after {:?}", reason, dj.settings.cooldown);
                    dj.status.record_restart(reason);
                    thread::sleep(dj.settings.cooldown);
                }
            }
        })
}

/// What the loop would choose from at one hour, given the files and metadata on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourPlan {
    pub hour: u8,
    pub tracks: Vec<PlannedTrack>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTrack {
    pub name: String,
    pub window: BroadcastWindow,
    pub eligible: bool,
}

impl HourPlan {
    pub fn build(music_dir: &Path, store: &MetadataStore, hour: u8) -> Self {
        let tracks = list_tracks(music_dir);
        let playlist = store.load();
        let eligible = eligible_tracks(&tracks, &playlist, hour);

        let tracks = tracks
            .into_iter()
            .map(|name| PlannedTrack {
                window: playlist.get(&name).copied().unwrap_or_default(),
                eligible: eligible.contains(&name),
                name,
            })
            .collect();
        Self { hour, tracks }
    }

    pub fn eligible_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.eligible).count()
    }

    /// The loop would pick from the whole library
    pub fn is_fallback(&self) -> bool {
        !self.tracks.is_empty() && self.eligible_count() == 0
    }

    pub fn summary(&self) -> String {
        if self.tracks.is_empty() {
            "Library is empty, the DJ would idle".to_string()
        } else if self.is_fallback() {
            "No valid songs for this hour, the DJ would fall back to all tracks".to_string()
        } else {
            format!("{} eligible track(s)", self.eligible_count())
        }
    }
}

impl fmt::Display for HourPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hour: {}", self.hour)?;
        writeln!(f, "Tracks on disk: {}", self.tracks.len())?;
        for track in &self.tracks {
            let mark = if track.eligible { "*" } else { " " };
            writeln!(f, "  {} {} (window {})", mark, track.name, track.window)?;
        }
        write!(f, "{}", self.summary())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
