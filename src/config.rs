use crate::error::{PlayError, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Default audio buffer time in milliseconds when none is configured.
pub const DEFAULT_AUDIO_BUFFER_TIME_MS: u32 = 336;

/// Runtime settings for the audio/video pipelines.
///
/// Values come from defaults, then the first config file found, then
/// `VDKPLAY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Buffered audio before playback starts; 0 selects the default.
    pub audio_buffer_time_ms: u32,
    /// Start audio with a smaller fill multiplier and without video skip.
    pub audio_fast_switch: bool,
    /// Apply volume in software at drain time instead of on the sink.
    pub audio_soft_volume: bool,
    pub audio_normalize: bool,
    /// Upper normalizer gain in 1/1000 units.
    pub audio_max_normalize: u32,
    pub audio_compression: bool,
    /// Upper compressor gain in 1/1000 units.
    pub audio_max_compression: u32,
    /// Volume reduction for stereo input, 0..1000.
    pub audio_stereo_descent: u32,
    /// Render every channel count as stereo.
    pub audio_downmix: bool,
    /// Extra audio delay relative to video, 90 kHz ticks.
    pub video_audio_delay: i64,
    /// Name of the audio sink variant.
    pub audio_sink: String,
    /// Log TS continuity counter gaps.
    pub ts_continuity_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_buffer_time_ms: DEFAULT_AUDIO_BUFFER_TIME_MS,
            audio_fast_switch: false,
            audio_soft_volume: false,
            audio_normalize: false,
            audio_max_normalize: 2000,
            audio_compression: false,
            audio_max_compression: 2000,
            audio_stereo_descent: 0,
            audio_downmix: false,
            video_audio_delay: 0,
            audio_sink: String::from("noop"),
            ts_continuity_check: false,
        }
    }
}

impl Config {
    /// Loads the configuration from the usual places.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = ["./vdkplay.toml", "./config.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                let content = std::fs::read_to_string(path)?;
                config = Config::from_toml_str(&content)?;
                log::info!("config: loaded {}", path);
                break;
            }
        }

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PlayError::Config(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("VDKPLAY_AUDIO_BUFFER_TIME") {
            self.audio_buffer_time_ms = v;
        }
        if let Some(v) = env_flag("VDKPLAY_AUDIO_FAST_SWITCH") {
            self.audio_fast_switch = v;
        }
        if let Some(v) = env_flag("VDKPLAY_AUDIO_SOFT_VOLUME") {
            self.audio_soft_volume = v;
        }
        if let Some(v) = env_flag("VDKPLAY_AUDIO_NORMALIZE") {
            self.audio_normalize = v;
        }
        if let Some(v) = env_flag("VDKPLAY_AUDIO_COMPRESSION") {
            self.audio_compression = v;
        }
        if let Some(v) = env_flag("VDKPLAY_AUDIO_DOWNMIX") {
            self.audio_downmix = v;
        }
        if let Some(v) = env_parse("VDKPLAY_VIDEO_AUDIO_DELAY") {
            self.video_audio_delay = v;
        }
        if let Ok(sink) = env::var("VDKPLAY_AUDIO_SINK") {
            if !sink.is_empty() {
                self.audio_sink = sink;
            }
        }
    }

    /// Buffer time with the 0 = default rule applied.
    pub fn buffer_time_ms(&self) -> u32 {
        if self.audio_buffer_time_ms == 0 {
            DEFAULT_AUDIO_BUFFER_TIME_MS
        } else {
            self.audio_buffer_time_ms
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# vdkplay configuration

# buffered audio before playback starts (ms), 0 = default
audio_buffer_time_ms = 336
audio_fast_switch = false
audio_soft_volume = false
audio_normalize = false
audio_max_normalize = 2000
audio_compression = false
audio_max_compression = 2000
audio_stereo_descent = 0
audio_downmix = false
# 90 kHz ticks
video_audio_delay = 0
audio_sink = "noop"
ts_continuity_check = false
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
