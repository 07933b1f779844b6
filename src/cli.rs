use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::generation::{
    generate_image, GeneratedImage, GenerationClient, ProgressEvent, ProgressReporter,
};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateArgs {
    pub prompt: String,
    pub output: Option<PathBuf>,
    /// Print inline images as a `data:` URL instead of writing a file.
    pub data_url: bool,
}

pub fn generate_usage() -> &'static str {
    "Usage: cargo run -- generate --prompt <text> [--output <path>] [--data-url]"
}

pub fn parse_generate_args(args: &[String]) -> Result<Option<GenerateArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("generate") {
        return Ok(None);
    }

    let mut prompt: Option<String> = None;
    let mut output: Option<PathBuf> = None;
    let mut data_url = false;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--prompt" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --prompt"))?;
                // A literal "\n" starts a new prompt line.
                prompt = Some(value.replace("\\n", "\n"));
            }
            "--output" | "-o" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --output"))?;
                output = Some(PathBuf::from(value));
            }
            "--data-url" => {
                data_url = true;
            }
            "--help" | "-h" => {
                return Err(anyhow!(generate_usage()));
            }
            other => {
                return Err(anyhow!(
                    "Unknown generate argument: {other}\n{}",
                    generate_usage()
                ));
            }
        }
        index += 1;
    }

    let prompt = prompt
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("--prompt is required\n{}", generate_usage()))?;

    Ok(Some(GenerateArgs {
        prompt,
        output,
        data_url,
    }))
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Submitted => info!("Request submitted"),
        ProgressEvent::Polling { attempt } => info!(attempt = *attempt, "Waiting for image"),
        ProgressEvent::KeepAlive => {}
        ProgressEvent::Completed => info!("Image generated"),
        ProgressEvent::Failed { reason } => warn!("Generation failed: {reason}"),
    }
}

pub async fn run_generate(client: &GenerationClient, args: GenerateArgs) -> Result<()> {
    CONFIG.require_api_key()?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let logger = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(&event);
            if event.is_terminal() {
                break;
            }
        }
    });

    let mut reporter = ProgressReporter::new(tx);
    let result = generate_image(
        client,
        &args.prompt,
        &CONFIG.default_parameters(),
        &CONFIG.request_settings(),
        &mut reporter,
        &cancel,
    )
    .await;
    drop(reporter);
    ctrl_c.abort();
    let _ = logger.await;

    let image = result.map_err(|err| anyhow!(err.user_message()))?;
    match image {
        GeneratedImage::Url(url) => {
            println!("{url}");
        }
        GeneratedImage::Base64(_) if args.data_url => {
            println!("{}", image.data_url());
        }
        GeneratedImage::Base64(ref bytes) => {
            let path = args
                .output
                .unwrap_or_else(|| PathBuf::from(format!("image.{}", image.file_extension())));
            tokio::fs::write(&path, bytes).await?;
            info!("Wrote {} bytes to {}", bytes.len(), path.display());
            println!("{}", path.display());
        }
    }

    Ok(())
}
