use std::str::FromStr;

use serde::Serialize;
use tracing::{info, warn};

use crate::generation::error::GenerationError;
use crate::generation::overrides::{OverrideSet, ParsedPrompt};

pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;
pub const MAX_STEPS: u32 = 100;
pub const MAX_CFG_SCALE: f32 = 20.0;
pub const MAX_SEED: u64 = 999_999_999;

pub const PARAMETER_KEYS: [&str; 7] = [
    "width",
    "height",
    "steps",
    "seed",
    "cfg_scale",
    "negative_prompt",
    "style_preset",
];

pub const KNOWN_STYLE_PRESETS: [&str; 32] = [
    "3D Model",
    "Analog Film",
    "Anime",
    "Cinematic",
    "Comic Book",
    "Craft Clay",
    "Digital Art",
    "Enhance",
    "Fantasy Art",
    "Isometric Style",
    "Line Art",
    "Lowpoly",
    "Neon Punk",
    "Origami",
    "Photographic",
    "Pixel Art",
    "Texture",
    "Advertising",
    "Food Photography",
    "Real Estate",
    "Abstract",
    "Cubist",
    "Graffiti",
    "Hyperrealism",
    "Impressionist",
    "Pointillism",
    "Pop Art",
    "Psychedelic",
    "Renaissance",
    "Steampunk",
    "Surrealist",
    "Watercolor",
];

/// Canonical spelling of a known preset, matched case-insensitively.
pub fn canonical_style_preset(value: &str) -> Option<&'static str> {
    let trimmed = value.trim();
    KNOWN_STYLE_PRESETS
        .iter()
        .copied()
        .find(|preset| preset.eq_ignore_ascii_case(trimmed))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParameters {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: u64,
    pub cfg_scale: f32,
    pub negative_prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub style_preset: String,
}

impl GenerationParameters {
    pub fn has_known_style_preset(&self) -> bool {
        self.style_preset.is_empty() || canonical_style_preset(&self.style_preset).is_some()
    }

    /// Checks every field against the same rules applied to overrides.
    pub fn validate(&self) -> Result<(), GenerationError> {
        check_dimension("width", &self.width.to_string(), self.width)?;
        check_dimension("height", &self.height.to_string(), self.height)?;
        check_steps(&self.steps.to_string(), self.steps)?;
        check_seed(&self.seed.to_string(), self.seed)?;
        check_cfg_scale(&self.cfg_scale.to_string(), self.cfg_scale)?;
        Ok(())
    }
}

/// Request-level settings that are not user-overridable.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub model: String,
    pub hide_watermark: bool,
    pub return_binary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(flatten)]
    pub params: GenerationParameters,
    pub hide_watermark: bool,
    pub return_binary: bool,
}

fn parse_number<T: FromStr>(key: &str, raw: &str, expected: &str) -> Result<T, GenerationError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| GenerationError::invalid(key, raw, format!("expected {expected}")))
}

fn check_dimension(key: &str, raw: &str, value: u32) -> Result<u32, GenerationError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(GenerationError::invalid(
            key,
            raw,
            format!("must be between {MIN_DIMENSION} and {MAX_DIMENSION}"),
        ));
    }
    Ok(value)
}

fn check_steps(raw: &str, value: u32) -> Result<u32, GenerationError> {
    if value == 0 || value > MAX_STEPS {
        return Err(GenerationError::invalid(
            "steps",
            raw,
            format!("must be between 1 and {MAX_STEPS}"),
        ));
    }
    Ok(value)
}

fn check_seed(raw: &str, value: u64) -> Result<u64, GenerationError> {
    if value > MAX_SEED {
        return Err(GenerationError::invalid(
            "seed",
            raw,
            format!("must be between 0 and {MAX_SEED}"),
        ));
    }
    Ok(value)
}

fn check_cfg_scale(raw: &str, value: f32) -> Result<f32, GenerationError> {
    if !value.is_finite() || value <= 0.0 || value > MAX_CFG_SCALE {
        return Err(GenerationError::invalid(
            "cfg_scale",
            raw,
            format!("must be greater than 0 and at most {MAX_CFG_SCALE}"),
        ));
    }
    Ok(value)
}

fn resolve_style_preset(raw: &str) -> String {
    match canonical_style_preset(raw) {
        Some(preset) => preset.to_string(),
        None => {
            warn!(
                "Unknown style preset '{}', passing it through to the image API",
                raw
            );
            raw.trim().to_string()
        }
    }
}

pub fn merge_overrides(
    defaults: &GenerationParameters,
    overrides: &OverrideSet,
) -> Result<GenerationParameters, GenerationError> {
    if overrides.is_empty() {
        return Ok(defaults.clone());
    }
    for key in overrides.keys() {
        if !PARAMETER_KEYS.contains(&key) {
            info!("Ignoring unknown prompt override '{}'", key);
        }
    }

    let mut params = defaults.clone();

    if let Some(raw) = overrides.get("width") {
        let value = parse_number("width", raw, "a whole number")?;
        params.width = check_dimension("width", raw, value)?;
    }
    if let Some(raw) = overrides.get("height") {
        let value = parse_number("height", raw, "a whole number")?;
        params.height = check_dimension("height", raw, value)?;
    }
    if let Some(raw) = overrides.get("steps") {
        let value = parse_number("steps", raw, "a whole number")?;
        params.steps = check_steps(raw, value)?;
    }
    if let Some(raw) = overrides.get("seed") {
        let value = parse_number("seed", raw, "a non-negative whole number")?;
        params.seed = check_seed(raw, value)?;
    }
    if let Some(raw) = overrides.get("cfg_scale") {
        let value = parse_number("cfg_scale", raw, "a number")?;
        params.cfg_scale = check_cfg_scale(raw, value)?;
    }
    if let Some(raw) = overrides.get("negative_prompt") {
        params.negative_prompt = raw.to_string();
    }
    if let Some(raw) = overrides.get("style_preset") {
        params.style_preset = resolve_style_preset(raw);
    }

    Ok(params)
}

pub fn build_request(
    parsed: &ParsedPrompt,
    defaults: &GenerationParameters,
    settings: &RequestSettings,
) -> Result<GenerationRequest, GenerationError> {
    if parsed.prompt.trim().is_empty() {
        return Err(GenerationError::invalid(
            "prompt",
            "",
            "the prompt text is empty",
        ));
    }

    let params = merge_overrides(defaults, &parsed.overrides)?;
    Ok(GenerationRequest {
        model: settings.model.clone(),
        prompt: parsed.prompt.clone(),
        params,
        hide_watermark: settings.hide_watermark,
        return_binary: settings.return_binary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::overrides::parse_prompt_overrides;

    fn defaults() -> GenerationParameters {
        GenerationParameters {
            width: 720,
            height: 1080,
            steps: 80,
            seed: 123,
            cfg_scale: 7.0,
            negative_prompt: String::new(),
            style_preset: "Photographic".to_string(),
        }
    }

    fn settings() -> RequestSettings {
        RequestSettings {
            model: "fluently-xl".to_string(),
            hide_watermark: true,
            return_binary: false,
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> OverrideSet {
        let mut set = OverrideSet::new();
        for (key, value) in pairs {
            set.insert(key, value);
        }
        set
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let merged = merge_overrides(&defaults(), &overrides(&[("steps", "60")])).unwrap();
        assert_eq!(merged.steps, 60);
        assert_eq!(merged.width, 720);
        assert_eq!(merged.height, 1080);
        assert_eq!(merged.seed, 123);
        assert_eq!(merged.style_preset, "Photographic");
    }

    #[test]
    fn non_numeric_width_is_rejected_with_field_name() {
        let err = merge_overrides(&defaults(), &overrides(&[("width", "abc")])).unwrap_err();
        match err {
            GenerationError::InvalidParameter { key, raw_value, .. } => {
                assert_eq!(key, "width");
                assert_eq!(raw_value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_fail_instead_of_clamping() {
        let err = merge_overrides(&defaults(), &overrides(&[("steps", "500")])).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidParameter { ref key, .. } if key == "steps"));

        let err = merge_overrides(&defaults(), &overrides(&[("cfg_scale", "0")])).unwrap_err();
        assert!(
            matches!(err, GenerationError::InvalidParameter { ref key, .. } if key == "cfg_scale")
        );

        let err = merge_overrides(&defaults(), &overrides(&[("height", "32")])).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::InvalidParameter { ref key, .. } if key == "height"
        ));
    }

    #[test]
    fn first_invalid_field_is_reported() {
        let err = merge_overrides(
            &defaults(),
            &overrides(&[("seed", "-1"), ("width", "wide")]),
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidParameter { ref key, .. } if key == "width"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let merged =
            merge_overrides(&defaults(), &overrides(&[("lighting", "soft")])).unwrap();
        assert_eq!(merged, defaults());
    }

    #[test]
    fn style_presets_are_canonicalized_or_flagged() {
        let merged =
            merge_overrides(&defaults(), &overrides(&[("style_preset", "digital art")])).unwrap();
        assert_eq!(merged.style_preset, "Digital Art");
        assert!(merged.has_known_style_preset());

        let merged =
            merge_overrides(&defaults(), &overrides(&[("style_preset", "Vaporwave")])).unwrap();
        assert_eq!(merged.style_preset, "Vaporwave");
        assert!(!merged.has_known_style_preset());
    }

    #[test]
    fn cfg_scale_accepts_fractions() {
        let merged = merge_overrides(&defaults(), &overrides(&[("cfg_scale", "7.5")])).unwrap();
        assert_eq!(merged.cfg_scale, 7.5);
    }

    #[test]
    fn request_serializes_with_api_field_names() {
        let parsed = parse_prompt_overrides("A cat\nwidth: 1024\nnegative_prompt: blurry");
        let request = build_request(&parsed, &defaults(), &settings()).unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["prompt"], "A cat");
        assert_eq!(body["model"], "fluently-xl");
        assert_eq!(body["width"], 1024);
        assert_eq!(body["height"], 1080);
        assert_eq!(body["steps"], 80);
        assert_eq!(body["seed"], 123);
        assert_eq!(body["cfg_scale"], 7.0);
        assert_eq!(body["negative_prompt"], "blurry");
        assert_eq!(body["style_preset"], "Photographic");
        assert_eq!(body["hide_watermark"], true);
        assert_eq!(body["return_binary"], false);
    }

    #[test]
    fn empty_style_preset_is_left_out_of_the_payload() {
        let mut params = defaults();
        params.style_preset.clear();
        let parsed = parse_prompt_overrides("A cat");
        let request = build_request(&parsed, &params, &settings()).unwrap();
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("style_preset").is_none());
    }

    #[test]
    fn empty_prompt_is_rejected_before_merging() {
        let parsed = parse_prompt_overrides("   ");
        let err = build_request(&parsed, &defaults(), &settings()).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::InvalidParameter { ref key, .. } if key == "prompt"
        ));
    }

    #[test]
    fn validate_rejects_bad_configured_defaults() {
        let mut params = defaults();
        params.steps = 0;
        assert!(params.validate().is_err());
        assert!(defaults().validate().is_ok());
    }
}
