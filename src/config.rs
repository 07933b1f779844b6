use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use tracing::warn;

use crate::generation::params::{GenerationParameters, RequestSettings, MAX_SEED};
use crate::generation::ClientSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub venice_api_base_url: String,
    pub venice_api_key: String,
    pub venice_model_id: String,
    pub venice_status_path: String,
    pub image_width: u32,
    pub image_height: u32,
    pub image_steps: u32,
    pub image_cfg_scale: f32,
    pub image_seed: Option<u64>,
    pub image_style_preset: String,
    pub image_negative_prompt: String,
    pub hide_watermark: bool,
    pub return_binary: bool,
    pub request_timeout_seconds: u64,
    pub generation_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub poll_max_retries: u32,
    pub retry_base_delay_ms: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Falls back to `default` when the variable is unset; a value that does not
/// parse is reported and also falls back.
fn parse_env_value<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("Invalid {} value '{}'; using default {}", name, raw, default);
            default
        }
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    parse_env_value(name, env::var(name).ok(), default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    parse_env_value(name, env::var(name).ok(), default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    parse_env_value(name, env::var(name).ok(), default)
}

/// Read ahead of `CONFIG` so logging is up before config warnings fire.
pub fn log_level_from_env() -> String {
    env_string("LOG_LEVEL", "info").to_lowercase()
}

/// `IMAGE_SEED` may be set to an empty string to request a random seed.
fn parse_seed(value: Option<String>, default: Option<u64>) -> Option<u64> {
    let Some(value) = value else {
        return default;
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("random") {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(seed) => Some(seed),
        Err(_) => {
            warn!("Invalid IMAGE_SEED value '{}'; using a random seed", value);
            None
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = Config {
            bot_token: env_string("BOT_TOKEN", ""),
            venice_api_base_url: env_string(
                "VENICE_API_BASE_URL",
                "https://api.venice.ai/api/v1",
            ),
            venice_api_key: env_string("VENICE_API_KEY", ""),
            venice_model_id: env_string("VENICE_MODEL_ID", "fluently-xl"),
            venice_status_path: env_string("VENICE_STATUS_PATH", "/image/generate/{id}"),
            image_width: env_u32("IMAGE_WIDTH", 720),
            image_height: env_u32("IMAGE_HEIGHT", 1080),
            image_steps: env_u32("IMAGE_STEPS", 80),
            image_cfg_scale: env_f32("IMAGE_CFG_SCALE", 7.0),
            image_seed: parse_seed(env::var("IMAGE_SEED").ok(), Some(123)),
            image_style_preset: env_string("IMAGE_STYLE_PRESET", "Photographic"),
            image_negative_prompt: env_string("IMAGE_NEGATIVE_PROMPT", ""),
            hide_watermark: env_bool("HIDE_WATERMARK", true),
            return_binary: env_bool("RETURN_BINARY", false),
            request_timeout_seconds: env_u64("REQUEST_TIMEOUT_SECONDS", 90),
            generation_timeout_seconds: env_u64("GENERATION_TIMEOUT_SECONDS", 300),
            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 2000),
            keep_alive_interval_ms: env_u64("KEEP_ALIVE_INTERVAL_MS", 1000),
            poll_max_retries: env_u32("POLL_MAX_RETRIES", 3),
            retry_base_delay_ms: env_u64("RETRY_BASE_DELAY_MS", 900),
        };

        config
            .default_parameters()
            .validate()
            .map_err(|err| anyhow!("Invalid image defaults in environment: {err}"))?;

        Ok(config)
    }

    /// Defaults for one request; an unset seed is drawn fresh each time.
    pub fn default_parameters(&self) -> GenerationParameters {
        let seed = self
            .image_seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_SEED));
        GenerationParameters {
            width: self.image_width,
            height: self.image_height,
            steps: self.image_steps,
            seed,
            cfg_scale: self.image_cfg_scale,
            negative_prompt: self.image_negative_prompt.clone(),
            style_preset: self.image_style_preset.trim().to_string(),
        }
    }

    pub fn request_settings(&self) -> RequestSettings {
        RequestSettings {
            model: self.venice_model_id.clone(),
            hide_watermark: self.hide_watermark,
            return_binary: self.return_binary,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(100)),
            keep_alive_interval: Duration::from_millis(self.keep_alive_interval_ms.max(100)),
            overall_timeout: Duration::from_secs(self.generation_timeout_seconds.max(1)),
            max_retries: self.poll_max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn require_api_key(&self) -> Result<()> {
        if self.venice_api_key.trim().is_empty() {
            return Err(anyhow!("VENICE_API_KEY is required to generate images"));
        }
        Ok(())
    }
}
