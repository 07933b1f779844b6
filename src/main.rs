use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod cli;
mod config;
mod generation;
mod handlers;
mod state;
mod utils;

use cli::{parse_generate_args, run_generate};
use config::CONFIG;
use generation::{GenerationClient, VeniceBackend};
use handlers::image;
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Img(String),
    Image(String),
    Cancel,
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

fn build_generation_client() -> GenerationClient {
    let backend = VeniceBackend::new(
        &CONFIG.venice_api_base_url,
        &CONFIG.venice_api_key,
        &CONFIG.venice_status_path,
        CONFIG.request_timeout(),
    );
    GenerationClient::new(Arc::new(backend), CONFIG.client_settings())
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging(&config::log_level_from_env());

    let args: Vec<String> = std::env::args().collect();
    if let Some(generate_args) = parse_generate_args(&args)? {
        let client = build_generation_client();
        run_generate(&client, generate_args).await?;
        return Ok(());
    }

    if CONFIG.bot_token.trim().is_empty() {
        return Err("BOT_TOKEN is required unless running generate".into());
    }
    if CONFIG.require_api_key().is_err() {
        error!("VENICE_API_KEY is not set; /img will reply with a configuration error");
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!(
        model = CONFIG.venice_model_id.as_str(),
        "Starting Venice image bot"
    );

    let state = AppState::new(build_generation_client());

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .endpoint(ignore_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    fn optional_arg(arg: String) -> Option<String> {
        if arg.trim().is_empty() {
            None
        } else {
            Some(arg)
        }
    }

    match command {
        Command::Start => image::start_handler(bot, message).await?,
        Command::Help => image::help_handler(bot, message).await?,
        Command::Img(arg) | Command::Image(arg) => {
            let arg = optional_arg(arg);
            tokio::spawn(async move {
                if let Err(err) = image::img_handler(bot, state, message, arg).await {
                    error!("img handler failed: {err}");
                }
            });
        }
        Command::Cancel => image::cancel_handler(bot, state, message).await?,
    }
    Ok(())
}

async fn ignore_message() -> HandlerResult {
    Ok(())
}
