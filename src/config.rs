use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_music_dir() -> PathBuf {
    PathBuf::from("/app/music")
}

fn default_api_port() -> u16 {
    8000
}

fn default_max_upload_mb() -> usize {
    200
}

/// Top-level configuration file structure
///
/// Every field has a default, so an empty file (or no file at all) is valid
/// as long as the broadcast host and password come from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the tracks (default: /app/music)
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
    /// Metadata document (default: <music_dir>/metadata.json)
    pub metadata_file: Option<PathBuf>,
    /// Control API port (default: 8000)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Maximum upload size in megabytes (default: 200)
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub dj: DjConfig,
}

/// Icecast source connection (maps to [broadcast] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Icecast server hostname (required, env ICECAST_HOST)
    pub host: Option<String>,
    /// Icecast server port (default: 8000, env ICECAST_PORT)
    pub port: u16,
    /// Mount point, e.g. /stream (env ICECAST_MOUNT)
    pub mount: String,
    /// Source username (default: source, env ICECAST_USER)
    pub user: String,
    /// Source password (required, env ICECAST_PASSWORD)
    pub password: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 8000,
            mount: "/stream".to_string(),
            user: "source".to_string(),
            password: None,
        }
    }
}

/// External encoder invocation (maps to [encoder] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    /// Encoder program (default: ffmpeg, resolved through PATH)
    pub program: PathBuf,
    /// Arguments placed before the input, e.g. ["-hide_banner", "-loglevel", "error"]
    pub extra_args: Vec<String>,
    /// Audio codec (default: libmp3lame)
    pub codec: String,
    /// Audio bitrate (default: 128k)
    pub bitrate: String,
    /// Content type announced to the server (default: audio/mpeg)
    pub content_type: String,
    /// Output container (default: mp3)
    pub format: String,
    /// Kill the encoder if a single track runs longer than this (default: no limit)
    pub timeout_secs: Option<u64>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            extra_args: Vec::new(),
            codec: "libmp3lame".to_string(),
            bitrate: "128k".to_string(),
            content_type: "audio/mpeg".to_string(),
            format: "mp3".to_string(),
            timeout_secs: None,
        }
    }
}

/// Scheduling loop timing (maps to [dj] section in TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DjConfig {
    /// Wait before the first track so the broadcast server can come up (default: 5)
    pub startup_delay_secs: u64,
    /// Wait between library checks while the library is empty (default: 10)
    pub idle_interval_secs: u64,
    /// Wait after a failed transmission (default: 1)
    pub cooldown_secs: u64,
    /// Evaluate broadcast windows in UTC instead of local time (default: false)
    pub use_utc: bool,
}

impl Default for DjConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 5,
            idle_interval_secs: 10,
            cooldown_secs: 1,
            use_utc: false,
        }
    }
}

impl DjConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
            metadata_file: None,
            api_port: default_api_port(),
            max_upload_mb: default_max_upload_mb(),
            broadcast: BroadcastConfig::default(),
            encoder: EncoderConfig::default(),
            dj: DjConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: optional TOML file, then environment overrides, then validation
    pub fn load(config_path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::resolve(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge file and environment without validating (for commands that never stream)
    pub fn resolve(config_path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Override file values with environment variables
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ICECAST_HOST") {
            self.broadcast.host = Some(host);
        }
        if let Some(port) = lookup("ICECAST_PORT") {
            self.broadcast.port = port
                .trim()
                .parse()
                .map_err(|_| format!("Invalid ICECAST_PORT '{}'", port))?;
        }
        if let Some(mount) = lookup("ICECAST_MOUNT") {
            self.broadcast.mount = mount;
        }
        if let Some(user) = lookup("ICECAST_USER") {
            self.broadcast.user = user;
        }
        if let Some(password) = lookup("ICECAST_PASSWORD") {
            self.broadcast.password = Some(password);
        }
        if let Some(dir) = lookup("MUSIC_DIR") {
            self.music_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("METADATA_FILE") {
            self.metadata_file = Some(PathBuf::from(file));
        }
        if let Some(port) = lookup("API_PORT") {
            self.api_port = port
                .trim()
                .parse()
                .map_err(|_| format!("Invalid API_PORT '{}'", port))?;
        }
        Ok(())
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), String> {
        match &self.broadcast.host {
            Some(host) if !host.trim().is_empty() => {}
            _ => {
                return Err(
                    "Broadcast host is missing: set ICECAST_HOST or [broadcast] host".to_string(),
                )
            }
        }
        if self.broadcast.password.is_none() {
            return Err(
                "Broadcast password is missing: set ICECAST_PASSWORD or [broadcast] password"
                    .to_string(),
            );
        }
        if !self.broadcast.mount.starts_with('/') {
            return Err(format!(
                "Mount '{}' must start with '/'",
                self.broadcast.mount
            ));
        }
        if self.encoder.timeout_secs == Some(0) {
            return Err("encoder timeout_secs must be greater than 0".to_string());
        }
        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Metadata document path, defaulting to metadata.json inside the music directory
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_file
            .clone()
            .unwrap_or_else(|| self.music_dir.join("metadata.json"))
    }

    pub fn encoder_timeout(&self) -> Option<Duration> {
        self.encoder.timeout_secs.map(Duration::from_secs)
    }
}
