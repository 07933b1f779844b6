use std::time::{Duration, Instant};

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ReplyParameters};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};
use url::Url;

use crate::config::CONFIG;
use crate::generation::overrides::parse_prompt_overrides;
use crate::generation::{
    generate_image, GeneratedImage, GenerationError, ProgressEvent, ProgressReporter,
};
use crate::state::{AppState, GenerationKey};
use crate::utils::telegram::{edit_message_text_with_retry, send_message_with_retry};
use crate::utils::timing::{complete_command_timer, start_command_timer};

const CHAT_ACTION_INTERVAL: Duration = Duration::from_secs(4);
const POLL_STATUS_EVERY: u32 = 5;
const IMAGE_CAPTION_LIMIT: usize = 1000;

fn generation_key(message: &Message) -> GenerationKey {
    let user_id = message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
        .unwrap_or_default();
    (message.chat.id.0, user_id)
}

fn message_text(message: &Message) -> Option<String> {
    message
        .text()
        .or_else(|| message.caption())
        .map(|value| value.to_string())
}

/// The command argument, or the replied-to message when the argument is empty.
fn resolve_prompt(arg: Option<String>, message: &Message) -> Option<String> {
    if let Some(arg) = arg.filter(|value| !value.trim().is_empty()) {
        return Some(arg);
    }
    message
        .reply_to_message()
        .and_then(message_text)
        .filter(|value| !value.trim().is_empty())
}

/// Status line shown for an event. Errors are rendered by the handler from the
/// returned error instead.
pub fn status_text(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Submitted => Some("Request submitted, generating image...".to_string()),
        ProgressEvent::Polling { attempt } if *attempt == 1 || attempt % POLL_STATUS_EVERY == 0 => {
            Some(format!("Still generating your image... (check #{attempt})"))
        }
        ProgressEvent::Completed => Some("Image generated!".to_string()),
        ProgressEvent::Polling { .. } | ProgressEvent::KeepAlive | ProgressEvent::Failed { .. } => {
            None
        }
    }
}

fn build_image_caption(prompt: &str) -> String {
    let cleaned = parse_prompt_overrides(prompt).prompt;
    let model = CONFIG.venice_model_id.as_str();
    let header = format!("Model: {model}\nPrompt: ");
    let budget = IMAGE_CAPTION_LIMIT.saturating_sub(header.chars().count());
    let preview: String = if cleaned.chars().count() > budget {
        let mut preview: String = cleaned.chars().take(budget.saturating_sub(3)).collect();
        preview.push_str("...");
        preview
    } else {
        cleaned
    };
    format!("{header}{preview}")
}

async fn render_progress(
    bot: Bot,
    chat_id: ChatId,
    status_message_id: MessageId,
    mut events: UnboundedReceiver<ProgressEvent>,
) {
    let mut last_action: Option<Instant> = None;
    while let Some(event) = events.recv().await {
        if matches!(event, ProgressEvent::KeepAlive | ProgressEvent::Polling { .. }) {
            let due = last_action.map_or(true, |at| at.elapsed() >= CHAT_ACTION_INTERVAL);
            if due {
                last_action = Some(Instant::now());
                if let Err(err) = bot.send_chat_action(chat_id, ChatAction::UploadPhoto).await {
                    warn!("send_chat_action failed: {err}");
                }
            }
        }
        if let Some(text) = status_text(&event) {
            if let Err(err) =
                edit_message_text_with_retry(&bot, chat_id, status_message_id, &text).await
            {
                warn!("Failed to update image status message: {err}");
            }
        }
    }
}

async fn send_generated_image(
    bot: &Bot,
    message: &Message,
    image: GeneratedImage,
    caption: String,
) -> Result<()> {
    let input = match &image {
        GeneratedImage::Url(url) => InputFile::url(Url::parse(url)?),
        GeneratedImage::Base64(bytes) => {
            InputFile::memory(bytes.clone()).file_name(format!("image.{}", image.file_extension()))
        }
    };

    let sent = bot
        .send_photo(message.chat.id, input)
        .caption(caption)
        .reply_parameters(ReplyParameters::new(message.id))
        .await;

    if let Err(err) = sent {
        warn!("send_photo failed: {err}");
        match image {
            GeneratedImage::Url(url) => {
                send_message_with_retry(bot, message.chat.id, &url, Some(message.id)).await?;
            }
            GeneratedImage::Base64(bytes) => {
                let document = InputFile::memory(bytes).file_name("image.png");
                bot.send_document(message.chat.id, document)
                    .reply_parameters(ReplyParameters::new(message.id))
                    .await?;
            }
        }
    }

    Ok(())
}

pub async fn img_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    prompt: Option<String>,
) -> Result<()> {
    let mut timer = start_command_timer("img", &message);

    let Some(prompt) = resolve_prompt(prompt, &message) else {
        send_message_with_retry(
            &bot,
            message.chat.id,
            "Please provide a prompt, e.g. /img A cat on a windowsill\nwidth: 1024",
            Some(message.id),
        )
        .await?;
        complete_command_timer(&mut timer, "skipped", Some("empty prompt".to_string()));
        return Ok(());
    };

    if let Err(err) = CONFIG.require_api_key() {
        error!("{err}");
        send_message_with_retry(
            &bot,
            message.chat.id,
            "Image generation is not configured.",
            Some(message.id),
        )
        .await?;
        complete_command_timer(&mut timer, "error", Some(err.to_string()));
        return Ok(());
    }

    let status_message =
        send_message_with_retry(&bot, message.chat.id, "Generating image...", Some(message.id))
            .await?;

    let key = generation_key(&message);
    let (generation_id, cancel) = state.active_generations.begin(key);
    info!(
        chat_id = key.0,
        user_id = key.1,
        active = state.active_generations.len(),
        "Image generation started"
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_progress(
        bot.clone(),
        message.chat.id,
        status_message.id,
        rx,
    ));

    let mut reporter = ProgressReporter::new(tx);
    let result = generate_image(
        &state.client,
        &prompt,
        &CONFIG.default_parameters(),
        &CONFIG.request_settings(),
        &mut reporter,
        &cancel,
    )
    .await;
    drop(reporter);
    if let Err(err) = renderer.await {
        warn!("Progress renderer task failed: {err}");
    }
    state.active_generations.finish(key, generation_id);

    match result {
        Ok(image) => {
            send_generated_image(&bot, &message, image, build_image_caption(&prompt)).await?;
            complete_command_timer(&mut timer, "success", None);
        }
        Err(err) => {
            let text = match &err {
                GenerationError::Cancelled => "Image generation cancelled.".to_string(),
                other => format!("Error: {}", other.user_message()),
            };
            edit_message_text_with_retry(&bot, message.chat.id, status_message.id, &text).await?;
            complete_command_timer(&mut timer, err.kind(), Some(err.to_string()));
        }
    }

    Ok(())
}

pub async fn cancel_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let key = generation_key(&message);
    let text = if state.active_generations.cancel(key) {
        info!(chat_id = key.0, user_id = key.1, "Image generation cancelled on request");
        "Cancelling your image generation..."
    } else {
        "You have no image generation in progress."
    };
    send_message_with_retry(&bot, message.chat.id, text, Some(message.id)).await?;
    Ok(())
}

pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    let help_text = "Image generation commands

/img <prompt> - Generate an image from a text prompt
/image <prompt> - Same as /img
/cancel - Stop your running image generation

Add parameter overrides on their own lines after the first line:
width: 1024
height: 768
steps: 40
seed: 42
cfg_scale: 7.5
negative_prompt: blurry, text
style_preset: Digital Art

Reply to a message with /img to use its text as the prompt.";
    send_message_with_retry(&bot, message.chat.id, help_text, Some(message.id)).await?;
    Ok(())
}

pub async fn start_handler(bot: Bot, message: Message) -> Result<()> {
    send_message_with_retry(
        &bot,
        message.chat.id,
        "Hello! I turn prompts into images. Use /help to see commands.",
        Some(message.id),
    )
    .await?;
    Ok(())
}
