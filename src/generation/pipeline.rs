use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::generation::client::GenerationClient;
use crate::generation::error::GenerationError;
use crate::generation::normalize::{normalize_response, GeneratedImage};
use crate::generation::overrides::parse_prompt_overrides;
use crate::generation::params::{build_request, GenerationParameters, RequestSettings};
use crate::generation::progress::ProgressReporter;
use crate::utils::timing::log_generation_timing;

/// Runs one prompt through parse, merge, dispatch and normalize. Exactly one
/// terminal event reaches the reporter unless the call is cancelled.
pub async fn generate_image(
    client: &GenerationClient,
    raw_prompt: &str,
    defaults: &GenerationParameters,
    settings: &RequestSettings,
    reporter: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<GeneratedImage, GenerationError> {
    let result = run_pipeline(client, raw_prompt, defaults, settings, reporter, cancel).await;

    match &result {
        Ok(image) => {
            let kind = match image {
                GeneratedImage::Url(_) => "url",
                GeneratedImage::Base64(_) => "base64",
            };
            info!(kind = kind, "Image generated");
            reporter.completed();
        }
        Err(GenerationError::Cancelled) => {
            info!("Image generation cancelled by the host");
            reporter.silence();
        }
        Err(err @ GenerationError::InvalidParameter { .. }) => {
            warn!("Rejected image prompt: {}", err);
            reporter.failed(err.to_string());
        }
        Err(err) => {
            error!(
                kind = err.kind(),
                retryable = err.is_retryable(),
                "Image generation failed: {}",
                err
            );
            reporter.failed(err.to_string());
        }
    }
    debug_assert!(reporter.is_finished());

    result
}

async fn run_pipeline(
    client: &GenerationClient,
    raw_prompt: &str,
    defaults: &GenerationParameters,
    settings: &RequestSettings,
    reporter: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<GeneratedImage, GenerationError> {
    let parsed = parse_prompt_overrides(raw_prompt);
    if !parsed.override_lines.is_empty() {
        debug!(lines = ?parsed.override_lines, "Extracted prompt overrides");
    }
    let request = build_request(&parsed, defaults, settings)?;
    if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled);
    }

    let metadata = json!({
        "overrides": parsed.overrides.len(),
        "width": request.params.width,
        "height": request.params.height,
        "steps": request.params.steps,
        "known_style_preset": request.params.has_known_style_preset(),
    });

    let request = &request;
    log_generation_timing(
        client.backend_name(),
        &request.model,
        Some(metadata),
        move || async move {
            let raw = client.execute(request, reporter, cancel).await?;
            normalize_response(raw)
        },
    )
    .await
}
