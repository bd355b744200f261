//! Environment-driven application configuration.

use std::path::PathBuf;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageSettings,
    pub scratch: ScratchConfig,
    pub encoder: EncoderConfig,
}

impl AppConfig {
    /// Load the full configuration from the environment.
    ///
    /// Only `STORAGE_BUCKET` is required; everything else falls back to
    /// a default.
    pub fn from_env() -> crate::Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env_or_default(),
            storage: StorageSettings::from_env()?,
            scratch: ScratchConfig::from_env_or_default(),
            encoder: EncoderConfig::from_env_or_default(),
        })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `PORT` (e.g. "8080")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Object-storage and delivery settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Logical bucket name.
    pub bucket: String,
    /// Service-credential file; absent means ambient credentials and
    /// unsigned public URLs.
    pub credentials_path: Option<PathBuf>,
    /// Key prefix under which streams live.
    pub media_prefix: String,
    /// Delivery base URL players are pointed at.
    pub cdn_base_url: String,
    /// Public object-access base, for URL derivation.
    pub public_base: String,
}

impl StorageSettings {
    const DEFAULT_PUBLIC_BASE: &'static str = "https://storage.googleapis.com";

    pub fn from_env() -> crate::Result<Self> {
        let bucket = std::env::var("STORAGE_BUCKET")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| crate::Error::config("STORAGE_BUCKET must be set"))?;

        let credentials_path = std::env::var("STORAGE_CREDENTIALS")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let media_prefix =
            std::env::var("MEDIA_PREFIX").unwrap_or_else(|_| "upload/videos".to_string());

        let public_base = Self::DEFAULT_PUBLIC_BASE.to_string();

        // Without a CDN in front, delivery falls back to the public
        // storage origin.
        let cdn_base_url = std::env::var("CDN_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("{}/{}/{}", public_base, bucket, media_prefix));

        Ok(Self {
            bucket,
            credentials_path,
            media_prefix,
            cdn_base_url,
            public_base,
        })
    }

    /// Storage prefix for one stream's artifacts.
    pub fn storage_path(&self, stream_id: &str) -> String {
        format!("{}/{}", self.media_prefix.trim_end_matches('/'), stream_id)
    }

    /// Published master-playlist URL for one stream.
    pub fn playlist_url(&self, stream_id: &str) -> String {
        format!(
            "{}/{}/playlist.m3u8",
            self.cdn_base_url.trim_end_matches('/'),
            stream_id
        )
    }
}

/// Scratch directories for the ingest and encoding stages.
#[derive(Debug, Clone)]
pub struct ScratchConfig {
    /// Root for per-stream ingest container files.
    pub ingest_dir: PathBuf,
    /// Root for per-stream HLS output trees.
    pub hls_dir: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            ingest_dir: PathBuf::from("/tmp/webrtc-ingest"),
            hls_dir: PathBuf::from("/tmp/hls"),
        }
    }
}

impl ScratchConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("INGEST_DIR")
            && !dir.trim().is_empty()
        {
            config.ingest_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("HLS_DIR")
            && !dir.trim().is_empty()
        {
            config.hls_dir = PathBuf::from(dir);
        }
        config
    }

    /// Per-stream ingest directory.
    pub fn ingest_path(&self, stream_id: &str) -> PathBuf {
        self.ingest_dir.join(stream_id)
    }

    /// Per-stream HLS output root.
    pub fn hls_path(&self, stream_id: &str) -> PathBuf {
        self.hls_dir.join(stream_id)
    }
}

/// One rung of the adaptive-bitrate ladder.
#[derive(Debug, Clone)]
pub struct VariantProfile {
    /// Variant name, also the output subdirectory (`1080p`, ...).
    pub name: String,
    /// Target frame height; width follows the source aspect ratio.
    pub height: u32,
    /// Video bitrate passed to the encoder (e.g. "5000k").
    pub video_bitrate: String,
}

impl VariantProfile {
    fn new(name: &str, height: u32, video_bitrate: &str) -> Self {
        Self {
            name: name.to_string(),
            height,
            video_bitrate: video_bitrate.to_string(),
        }
    }
}

/// Encoder (ffmpeg) configuration.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Input frame rate. The ingest container carries no timestamps, so
    /// the rate must be stated explicitly.
    pub frame_rate: u32,
    /// Target segment length in seconds.
    pub segment_seconds: u32,
    /// Number of segments kept in each variant playlist.
    pub playlist_window: u32,
    /// Add low-latency muxer flags.
    pub low_latency: bool,
    /// ABR ladder, highest rung first.
    pub variants: Vec<VariantProfile>,
    /// x264 preset.
    pub preset: String,
    /// Synthesized/encoded audio sample rate.
    pub audio_sample_rate: u32,
    /// Audio bitrate per variant.
    pub audio_bitrate: String,
    /// Feed the persisted audio track to the encoder instead of
    /// synthesizing silence.
    pub use_ingest_audio: bool,
    /// Container format for the optional full-resolution recording;
    /// `None` disables recording.
    pub record_format: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            frame_rate: 30,
            segment_seconds: 2,
            playlist_window: 5,
            low_latency: false,
            variants: vec![
                VariantProfile::new("1080p", 1080, "5000k"),
                VariantProfile::new("720p", 720, "2800k"),
                VariantProfile::new("480p", 480, "1400k"),
                VariantProfile::new("360p", 360, "800k"),
            ],
            preset: "veryfast".to_string(),
            audio_sample_rate: 44100,
            audio_bitrate: "128k".to_string(),
            use_ingest_audio: false,
            record_format: None,
        }
    }
}

impl EncoderConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FFMPEG_PATH")
            && !path.trim().is_empty()
        {
            config.ffmpeg_path = path;
        }

        if let Ok(secs) = std::env::var("HLS_SEGMENT_SECONDS")
            && let Ok(parsed) = secs.parse::<u32>()
            && parsed > 0
        {
            config.segment_seconds = parsed;
        }

        if let Ok(window) = std::env::var("HLS_PLAYLIST_WINDOW")
            && let Ok(parsed) = window.parse::<u32>()
            && parsed > 0
        {
            config.playlist_window = parsed;
        }

        if let Ok(low_latency) = std::env::var("HLS_LOW_LATENCY") {
            config.low_latency = matches!(low_latency.as_str(), "1" | "true" | "yes");
        }

        if let Ok(fmt) = std::env::var("RECORD_FORMAT")
            && !fmt.trim().is_empty()
        {
            config.record_format = Some(fmt);
        }

        config
    }

    /// GOP length: two seconds of frames, keeping segment boundaries on
    /// keyframes.
    pub fn gop_size(&self) -> u32 {
        self.frame_rate * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.enable_cors);
    }

    #[test]
    fn storage_url_derivation() {
        let settings = StorageSettings {
            bucket: "livecast-media".to_string(),
            credentials_path: None,
            media_prefix: "upload/videos".to_string(),
            cdn_base_url: "https://cdn.example.com".to_string(),
            public_base: "https://storage.googleapis.com".to_string(),
        };
        assert_eq!(settings.storage_path("abc"), "upload/videos/abc");
        assert_eq!(
            settings.playlist_url("abc"),
            "https://cdn.example.com/abc/playlist.m3u8"
        );
    }

    #[test]
    fn encoder_defaults() {
        let config = EncoderConfig::default();
        assert_eq!(config.variants.len(), 4);
        assert_eq!(config.variants[0].name, "1080p");
        assert_eq!(config.gop_size(), 60);
        assert!(config.record_format.is_none());
        assert!(!config.use_ingest_audio);
    }

    #[test]
    fn scratch_paths_are_per_stream() {
        let scratch = ScratchConfig::default();
        assert_eq!(
            scratch.ingest_path("abc"),
            PathBuf::from("/tmp/webrtc-ingest/abc")
        );
        assert_eq!(scratch.hls_path("abc"), PathBuf::from("/tmp/hls/abc"));
    }
}
