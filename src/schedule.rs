use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of hours in a broadcast day
pub const HOURS_PER_DAY: u8 = 24;

/// Hour-of-day broadcast window for a single track
///
/// Either bound may be missing, in which case the track is unrestricted.
/// Stored in the metadata document as `{"start_hour": 22, "end_hour": 2}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastWindow {
    #[serde(default)]
    pub start_hour: Option<u8>,
    #[serde(default)]
    pub end_hour: Option<u8>,
}

impl BroadcastWindow {
    pub fn new(start_hour: Option<u8>, end_hour: Option<u8>) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Window with no restriction (eligible at every hour)
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Both bounds present, i.e. the window actually restricts playback
    pub fn bounds(&self) -> Option<(u8, u8)> {
        match (self.start_hour, self.end_hour) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Check whether this window allows playback at `hour`
    pub fn allows(&self, hour: u8) -> bool {
        match self.bounds() {
            Some((start, end)) => is_in_active_window(hour, start, end),
            None => true,
        }
    }
}

impl fmt::Display for BroadcastWindow {
    /// Renders as `start-end`, with `None` for a missing bound
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |bound: Option<u8>| match bound {
            Some(hour) => hour.to_string(),
            None => "None".to_string(),
        };
        write!(f, "{}-{}", render(self.start_hour), render(self.end_hour))
    }
}

/// Parse an hour given as text (form field, CLI argument)
///
/// Empty input means "no bound". Anything else must be an integer in 0..=23.
pub fn parse_hour(value: &str) -> Result<Option<u8>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let hour: i64 = trimmed
        .parse()
        .map_err(|_| format!("Invalid hour '{}', expected an integer 0-23", trimmed))?;
    if !(0..HOURS_PER_DAY as i64).contains(&hour) {
        return Err(format!("Hour {} out of range, expected 0-23", hour));
    }
    Ok(Some(hour as u8))
}

/// Check if the current hour is inside the broadcast window
/// Handles overnight windows (e.g., 22 to 2)
///
/// The end hour is exclusive, so `start == end` never matches.
pub fn is_in_active_window(current_hour: u8, start_hour: u8, end_hour: u8) -> bool {
    if start_hour <= end_hour {
        // Same day window (e.g., 9 to 17)
        current_hour >= start_hour && current_hour < end_hour
    } else {
        // Overnight window (e.g., 22 to 2)
        current_hour >= start_hour || current_hour < end_hour
    }
}

/// Filter `tracks` down to the ones allowed to play at `hour`
///
/// Tracks without an entry in `windows` are unrestricted. Entries in `windows`
/// for tracks that are not in `tracks` are ignored. Input order is preserved.
pub fn eligible_tracks(
    tracks: &[String],
    windows: &BTreeMap<String, BroadcastWindow>,
    hour: u8,
) -> Vec<String> {
    tracks
        .iter()
        .filter(|track| {
            windows
                .get(track.as_str())
                .map_or(true, |window| window.allows(hour))
        })
        .cloned()
        .collect()
}
