use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use teloxide::types::Message;
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

const PROMPT_PREVIEW_CHARS: usize = 300;

/// Timing record for one bot command, from receipt to the final reply.
/// A timer dropped without an outcome is logged as `abandoned`.
#[derive(Debug)]
pub struct CommandTimer {
    command: &'static str,
    chat_id: i64,
    user_id: Option<i64>,
    message_id: i32,
    prompt_preview: Option<String>,
    received_at: DateTime<Utc>,
    started: Instant,
    outcome: Option<(String, Option<String>)>,
}

impl CommandTimer {
    fn from_message(command: &'static str, message: &Message) -> Self {
        let prompt_preview = message
            .text()
            .or_else(|| message.caption())
            .map(|value| value.replace('\n', " / "))
            .map(|value| value.chars().take(PROMPT_PREVIEW_CHARS).collect());

        CommandTimer {
            command,
            chat_id: message.chat.id.0,
            user_id: message
                .from
                .as_ref()
                .and_then(|user| i64::try_from(user.id.0).ok()),
            message_id: message.id.0,
            prompt_preview,
            received_at: Utc::now(),
            started: Instant::now(),
            outcome: None,
        }
    }

    fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            event = "command_received",
            command = self.command,
            chat_id = self.chat_id,
            user_id = ?self.user_id,
            message_id = self.message_id,
            received_at = %self.received_at.to_rfc3339(),
            prompt = ?self.prompt_preview,
            "command received"
        );
    }

    fn log_completed(&self, status: &str, detail: Option<&str>) {
        info!(
            target: TIMING_TARGET,
            event = "command_completed",
            command = self.command,
            chat_id = self.chat_id,
            user_id = ?self.user_id,
            message_id = self.message_id,
            received_at = %self.received_at.to_rfc3339(),
            replied_at = %Utc::now().to_rfc3339(),
            duration_s = self.started.elapsed().as_secs_f64(),
            status,
            detail = detail.unwrap_or_default(),
            "command completed"
        );
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        match self.outcome.take() {
            Some((status, detail)) => self.log_completed(&status, detail.as_deref()),
            None => self.log_completed("abandoned", None),
        }
    }
}

pub fn start_command_timer(command: &'static str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    timer.log_received();
    timer
}

/// Records the outcome; the completion line is written when the timer drops.
pub fn complete_command_timer(timer: &mut CommandTimer, status: &str, detail: Option<String>) {
    timer.outcome = Some((status.to_string(), detail));
}

/// Wraps one backend round trip with `generation_request`/`generation_response`
/// timing lines.
pub async fn log_generation_timing<T, E, F, Fut>(
    backend: &str,
    model: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let metadata = metadata.unwrap_or_else(|| JsonValue::Object(Default::default()));
    info!(
        target: TIMING_TARGET,
        event = "generation_request",
        backend,
        model,
        started_at = %Utc::now().to_rfc3339(),
        metadata = %metadata,
        "generation request"
    );

    let result = call().await;

    let (status, detail) = match &result {
        Ok(_) => ("success", String::new()),
        Err(err) => ("error", err.to_string()),
    };
    info!(
        target: TIMING_TARGET,
        event = "generation_response",
        backend,
        model,
        completed_at = %Utc::now().to_rfc3339(),
        duration_s = started.elapsed().as_secs_f64(),
        status,
        detail = %detail,
        metadata = %metadata,
        "generation response"
    );

    result
}
