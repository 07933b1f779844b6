use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::generation::client::{ImageBackend, JobHandle, JobStatus, RawResponse, SubmitOutcome};
use crate::generation::error::BackendError;
use crate::generation::params::GenerationRequest;
use crate::utils::http::get_http_client;

const PENDING_STATUSES: [&str; 6] = [
    "queued",
    "pending",
    "processing",
    "in_progress",
    "running",
    "starting",
];
const SUCCESS_STATUSES: [&str; 4] = ["completed", "succeeded", "success", "done"];
const FAILURE_STATUSES: [&str; 5] = ["failed", "error", "cancelled", "canceled", "expired"];
const JOB_ID_FIELDS: [&str; 4] = ["job_id", "request_id", "id", "task_id"];
const IMAGE_FIELDS: [&str; 4] = ["images", "data", "url", "image"];

#[derive(Debug, Clone)]
pub struct VeniceBackend {
    base_url: String,
    api_key: String,
    status_path: String,
    request_timeout: Duration,
}

impl VeniceBackend {
    pub fn new(
        base_url: &str,
        api_key: &str,
        status_path: &str,
        request_timeout: Duration,
    ) -> Self {
        VeniceBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            status_path: status_path.to_string(),
            request_timeout,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/image/generate", self.base_url)
    }

    fn status_url(&self, job: &JobHandle) -> String {
        let path = self.status_path.replace("{id}", &job.0);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    fn transport_error(&self, action: &str, err: reqwest::Error) -> BackendError {
        let message = format!("{} failed: {}", action, self.redact(&err.to_string()));
        if should_retry_error(&err) {
            BackendError::retryable(message)
        } else {
            BackendError::fatal(message)
        }
    }

    async fn read_body(
        &self,
        action: &str,
        response: Response,
    ) -> Result<RawResponse, BackendError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let detail = self.redact(&message.unwrap_or(body_summary));
            let message = format!("{} returned status {}: {}", action, status, detail);
            return Err(if should_retry_status(status) {
                BackendError::retryable(message)
            } else {
                BackendError::fatal(message)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(action, err))?;

        if content_type
            .as_deref()
            .is_some_and(|value| value.starts_with("image/"))
        {
            return Ok(RawResponse::Binary {
                bytes: bytes.to_vec(),
                content_type,
            });
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Ok(RawResponse::Json(value)),
            Err(err) if infer::is_image(&bytes) => {
                debug!("{} body is not JSON ({err}); treating it as image bytes", action);
                Ok(RawResponse::Binary {
                    bytes: bytes.to_vec(),
                    content_type,
                })
            }
            Err(err) => Err(BackendError::fatal(format!(
                "{} returned an unreadable body: {}",
                action, err
            ))),
        }
    }
}

#[async_trait]
impl ImageBackend for VeniceBackend {
    fn name(&self) -> &str {
        "venice"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome, BackendError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "imagegen.venice", payload = %summarize_request(request));
        }

        let response = get_http_client()
            .post(self.generate_url())
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| self.transport_error("Image generate request", err))?;

        let raw = self.read_body("Image generate request", response).await?;
        Ok(classify_submit(raw))
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        let response = get_http_client()
            .get(self.status_url(job))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| self.transport_error("Image job status request", err))?;

        let raw = self.read_body("Image job status request", response).await?;
        Ok(classify_status(raw))
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_request(request: &GenerationRequest) -> Value {
    json!({
        "model": request.model,
        "prompt": truncate_for_log(&request.prompt, 200),
        "width": request.params.width,
        "height": request.params.height,
        "steps": request.params.steps,
        "seed": request.params.seed,
        "cfg_scale": request.params.cfg_scale,
        "style_preset": request.params.style_preset,
        "return_binary": request.return_binary,
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = error_message(&value);
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn error_message(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.get("details").and_then(Value::as_str))
        .map(|message| message.to_string())
}

fn has_image_payload(value: &Value) -> bool {
    IMAGE_FIELDS.iter().any(|field| match value.get(*field) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(text)) => !text.trim().is_empty(),
        _ => false,
    })
}

fn job_id(value: &Value) -> Option<String> {
    JOB_ID_FIELDS.iter().find_map(|field| match value.get(*field) {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

fn status_of(value: &Value) -> Option<String> {
    value
        .get("status")
        .or_else(|| value.get("state"))
        .and_then(Value::as_str)
        .map(|status| status.trim().to_ascii_lowercase())
}

fn failure_reason(value: &Value, status: &str) -> String {
    error_message(value).unwrap_or_else(|| format!("job ended with status '{status}'"))
}

/// Decides whether a generate response already holds the image or a job id.
pub fn classify_submit(raw: RawResponse) -> SubmitOutcome {
    let value = match raw {
        RawResponse::Json(value) => value,
        binary => return SubmitOutcome::Completed(binary),
    };

    if has_image_payload(&value) {
        return SubmitOutcome::Completed(RawResponse::Json(value));
    }

    if let Some(status) = status_of(&value) {
        if FAILURE_STATUSES.contains(&status.as_str()) {
            return SubmitOutcome::Failed(failure_reason(&value, &status));
        }
    }

    match job_id(&value) {
        Some(id) => SubmitOutcome::Queued(JobHandle(id)),
        // Left for the normalizer to reject with the full payload.
        None => SubmitOutcome::Completed(RawResponse::Json(value)),
    }
}

pub fn classify_status(raw: RawResponse) -> JobStatus {
    let value = match raw {
        RawResponse::Json(value) => value,
        binary => return JobStatus::Succeeded(binary),
    };

    let status = status_of(&value);
    match status.as_deref() {
        Some(status) if FAILURE_STATUSES.contains(&status) => {
            JobStatus::Failed(failure_reason(&value, status))
        }
        Some(status) if SUCCESS_STATUSES.contains(&status) => {
            let payload = value
                .get("result")
                .or_else(|| value.get("output"))
                .filter(|inner| has_image_payload(inner))
                .cloned()
                .unwrap_or(value);
            JobStatus::Succeeded(RawResponse::Json(payload))
        }
        Some(status) if PENDING_STATUSES.contains(&status) => JobStatus::Pending,
        _ if has_image_payload(&value) => JobStatus::Succeeded(RawResponse::Json(value)),
        other => {
            warn!("Unknown image job status {:?}; polling again", other);
            JobStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_bearing_response_completes_synchronously() {
        let outcome = classify_submit(RawResponse::Json(json!({ "images": ["aGVsbG8="] })));
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
    }

    #[test]
    fn job_id_response_is_queued() {
        let outcome =
            classify_submit(RawResponse::Json(json!({ "id": "abc", "status": "queued" })));
        assert_eq!(outcome, SubmitOutcome::Queued(JobHandle("abc".to_string())));

        let outcome = classify_submit(RawResponse::Json(json!({ "request_id": 42 })));
        assert_eq!(outcome, SubmitOutcome::Queued(JobHandle("42".to_string())));
    }

    #[test]
    fn failed_submit_carries_api_message() {
        let outcome = classify_submit(RawResponse::Json(json!({
            "status": "failed",
            "error": { "message": "prompt rejected" }
        })));
        assert_eq!(outcome, SubmitOutcome::Failed("prompt rejected".to_string()));
    }

    #[test]
    fn binary_submit_is_complete() {
        let raw = RawResponse::Binary {
            bytes: vec![1, 2, 3],
            content_type: Some("image/webp".to_string()),
        };
        assert_eq!(classify_submit(raw.clone()), SubmitOutcome::Completed(raw));
    }

    #[test]
    fn status_mapping_covers_pending_success_and_failure() {
        assert_eq!(
            classify_status(RawResponse::Json(json!({ "status": "PROCESSING" }))),
            JobStatus::Pending
        );
        assert_eq!(
            classify_status(RawResponse::Json(json!({ "status": "failed" }))),
            JobStatus::Failed("job ended with status 'failed'".to_string())
        );
        assert_eq!(
            classify_status(RawResponse::Json(json!({
                "status": "completed",
                "result": { "images": ["https://a.test/x.png"] }
            }))),
            JobStatus::Succeeded(RawResponse::Json(json!({ "images": ["https://a.test/x.png"] })))
        );
    }

    #[test]
    fn status_without_label_but_with_images_succeeds() {
        let value = json!({ "images": ["https://a.test/y.png"] });
        assert_eq!(
            classify_status(RawResponse::Json(value.clone())),
            JobStatus::Succeeded(RawResponse::Json(value))
        );
    }

    #[test]
    fn status_url_substitutes_job_id() {
        let backend = VeniceBackend::new(
            "https://api.venice.ai/api/v1/",
            "key",
            "/image/generate/{id}",
            Duration::from_secs(5),
        );
        assert_eq!(
            backend.status_url(&JobHandle("j1".to_string())),
            "https://api.venice.ai/api/v1/image/generate/j1"
        );
        assert_eq!(backend.generate_url(), "https://api.venice.ai/api/v1/image/generate");
    }

    #[test]
    fn api_key_is_redacted_from_messages() {
        let backend =
            VeniceBackend::new("https://x.test", "sk-secret", "/s/{id}", Duration::from_secs(5));
        assert_eq!(backend.redact("bad key sk-secret"), "bad key [redacted]");
    }

    #[test]
    fn error_body_summary_prefers_api_message() {
        let (message, _) = summarize_error_body(r#"{"error":{"message":"Invalid API key"}}"#);
        assert_eq!(message.as_deref(), Some("Invalid API key"));
        let (message, summary) = summarize_error_body("");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }
}
