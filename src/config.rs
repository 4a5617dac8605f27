//! # Configuration Management
//!
//! Configuration is layered, later sources winning:
//!
//! 1. **Defaults** from [`AppConfig::default`]
//! 2. **`config.toml`** in the working directory (optional)
//! 3. **`APP_*` environment variables**, nested keys separated by `__`,
//!    e.g. `APP_SPEECH__REGION=westeurope` sets `speech.region`
//! 4. **Platform variables**: `HOST`, `PORT`, `SPEECH_KEY`, `SPEECH_REGION`
//!
//! `.env` files are loaded in `main` before any of this runs.
//!
//! ## Example config.toml:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [speech]
//! region = "westeurope"
//! voice = "en-GB-SoniaNeural"
//!
//! [upload]
//! max_bytes = 10485760
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub upload: UploadConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the external speech service.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub region: String,
    pub subscription_key: String,
    /// Replaces the regional host, e.g. for a private endpoint or a local container.
    pub endpoint: Option<String>,
    /// Recognition language and SSML `xml:lang`.
    pub language: String,
    pub voice: String,
    /// Value of the `X-Microsoft-OutputFormat` header for synthesis.
    pub output_format: String,
    pub request_timeout_secs: u64,
}

// Hand-written so the subscription key never reaches the logs.
impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("region", &self.region)
            .field(
                "subscription_key",
                &if self.subscription_key.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("endpoint", &self.endpoint)
            .field("language", &self.language)
            .field("voice", &self.voice)
            .field("output_format", &self.output_format)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Rate every uploaded file is resampled to before recognition (Hz).
    pub target_sample_rate: u32,
    /// Size of the PCM slices an upload is pushed to the recognizer in.
    pub chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: usize,
    /// Directory for the per-request temporary files. System temp dir when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Upper bound on concurrently open STT/TTS sessions across all endpoints.
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            speech: SpeechConfig {
                region: "eastus".to_string(),
                subscription_key: String::new(),
                endpoint: None,
                language: "en-US".to_string(),
                voice: "en-US-JennyNeural".to_string(),
                output_format: "raw-16khz-16bit-mono-pcm".to_string(),
                request_timeout_secs: 30,
            },
            audio: AudioConfig {
                target_sample_rate: 16_000,
                // 100 ms of 16 kHz mono 16-bit audio
                chunk_bytes: 3_200,
            },
            upload: UploadConfig {
                max_bytes: 25 * 1024 * 1024,
                dir: None,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
        }
    }
}

/// Platform variables that bypass the `APP_` prefix, and the key each one sets.
const PLATFORM_OVERRIDES: [(&str, &str); 4] = [
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("SPEECH_KEY", "speech.subscription_key"),
    ("SPEECH_REGION", "speech.region"),
];

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let builder = apply_platform_overrides(builder, |name| env::var(name).ok())?;
        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    ///
    /// A missing subscription key is not an error here: the server can still
    /// answer health checks, and `main` warns about it.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.speech.region.trim().is_empty() && self.speech.endpoint.is_none() {
            return Err(anyhow::anyhow!("Either speech.region or speech.endpoint must be set"));
        }

        if self.speech.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Speech request timeout must be greater than 0"));
        }

        if self.audio.target_sample_rate == 0 {
            return Err(anyhow::anyhow!("Target sample rate must be greater than 0"));
        }

        // Chunks carry whole 16-bit samples.
        if self.audio.chunk_bytes == 0 || self.audio.chunk_bytes % 2 != 0 {
            return Err(anyhow::anyhow!("Audio chunk size must be a positive even number of bytes"));
        }

        if self.upload.max_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.speech.subscription_key.trim().is_empty()
    }
}

fn apply_platform_overrides<F>(
    mut builder: config::ConfigBuilder<config::builder::DefaultState>,
    lookup: F,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>>
where
    F: Fn(&str) -> Option<String>,
{
    for (variable, key) in PLATFORM_OVERRIDES {
        if let Some(value) = lookup(variable) {
            builder = builder.set_override(key, value)?;
        }
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.audio.target_sample_rate, 16_000);
        assert_eq!(config.audio.chunk_bytes, 3_200);
        assert!(config.validate().is_ok());
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.chunk_bytes = 3_201;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.speech.region = String::new();
        assert!(config.validate().is_err());
        config.speech.endpoint = Some("http://localhost:5000".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_platform_overrides() {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap());

        let builder = apply_platform_overrides(builder, |name| match name {
            "PORT" => Some("9000".to_string()),
            "SPEECH_KEY" => Some("secret".to_string()),
            "SPEECH_REGION" => Some("westeurope".to_string()),
            _ => None,
        })
        .unwrap();

        let config: AppConfig = builder.build().unwrap().try_deserialize().unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.speech.region, "westeurope");
        assert!(config.has_credentials());
    }

    #[test]
    fn test_debug_redacts_subscription_key() {
        let mut speech = AppConfig::default().speech;
        speech.subscription_key = "super-secret".to_string();

        let debug = format!("{:?}", speech);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
