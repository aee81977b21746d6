use rand::seq::SliceRandom;
use rand::Rng;

/// Result of picking the next track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Picked from the tracks eligible at the current hour
    Scheduled(String),
    /// Nothing was eligible, picked from the whole library
    Fallback(String),
}

impl Selection {
    pub fn track(&self) -> &str {
        match self {
            Selection::Scheduled(track) | Selection::Fallback(track) => track,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Selection::Fallback(_))
    }
}

/// Pick a track uniformly at random
///
/// Prefers `eligible`; falls back to `all` so the stream never goes silent just
/// because no track is scheduled for this hour. Returns `None` only when both
/// are empty, which the scheduling loop rules out beforehand.
pub fn select_track<R: Rng + ?Sized>(
    eligible: &[String],
    all: &[String],
    rng: &mut R,
) -> Option<Selection> {
    if let Some(track) = eligible.choose(rng) {
        return Some(Selection::Scheduled(track.clone()));
    }
    all.choose(rng).map(|track| Selection::Fallback(track.clone()))
}
