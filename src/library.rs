use log::warn;
use std::path::Path;

/// File extension of playable tracks
pub const TRACK_EXTENSION: &str = ".mp3";

/// List playable tracks in the media directory, sorted by filename
///
/// Only regular files ending in `.mp3` count. A missing or unreadable directory
/// yields an empty list so the scheduling loop simply idles.
pub fn list_tracks(music_dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(music_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "Failed to read music directory {}: {}",
                music_dir.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut tracks: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(TRACK_EXTENSION))
        .collect();
    tracks.sort();
    tracks
}

/// Validate a client-supplied track filename
///
/// Track names are used directly as paths inside the media directory, so
/// anything that could point elsewhere is rejected.
pub fn validate_track_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Filename must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("Invalid filename '{}'", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(format!(
            "Invalid filename '{}': path separators are not allowed",
            name
        ));
    }
    Ok(())
}
