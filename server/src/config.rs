// Configuration for the server, read from the environment

use std::{path::PathBuf, time::Duration};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub cache_dir: PathBuf,
    pub model: String,
    pub model_map: PathBuf,
    pub default_voice: Option<String>,
    pub ffmpeg_path: PathBuf,
    pub engine_timeout_secs: u64,
    pub transcode_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            cache_dir: PathBuf::from("/tmp/tts_cache"),
            model: "piper".to_string(),
            model_map: PathBuf::from("models/map.json"),
            default_voice: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            engine_timeout_secs: 120,
            transcode_timeout_secs: 60,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_parse("PORT", defaults.port),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            cache_dir: env_string("TTS_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            model: env_string("TTS_MODEL").unwrap_or(defaults.model),
            model_map: env_string("TTS_MODEL_MAP")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_map),
            default_voice: env_string("TTS_DEFAULT_VOICE"),
            ffmpeg_path: env_string("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            engine_timeout_secs: env_parse("ENGINE_TIMEOUT_SECS", defaults.engine_timeout_secs),
            transcode_timeout_secs: env_parse(
                "TRANSCODE_TIMEOUT_SECS",
                defaults.transcode_timeout_secs,
            ),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }
}
