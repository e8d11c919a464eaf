use std::io::Write;

use clap::{Parser, ValueEnum};

use bing_chat::config::{load_config, ClientConfig};
use bing_chat::observability::init_tracing;
use bing_chat::protocol::{ChatTone, ExchangeMode};
use bing_chat::{BingChatClient, SendOptions, Tracking};
use tokio_util::sync::CancellationToken;

const CONFIG_ENV: &str = "BING_CHAT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Send one message to the chat hub and stream the reply to stdout.
#[derive(Parser)]
#[command(name = "bing-chat")]
struct CliArgs {
    /// Wrap the message in a compose prompt instead of chatting
    #[arg(long)]
    compose: bool,
    /// Keep the exchange in a locally tracked conversation
    #[arg(long)]
    track: bool,
    /// Override the configured chat tone
    #[arg(long, value_enum)]
    tone: Option<ToneArg>,
    #[arg(required = true, trailing_var_arg = true)]
    message: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ToneArg {
    Creative,
    Precise,
    Balanced,
}

impl From<ToneArg> for ChatTone {
    fn from(tone: ToneArg) -> Self {
        match tone {
            ToneArg::Creative => ChatTone::Creative,
            ToneArg::Precise => ChatTone::Precise,
            ToneArg::Balanced => ChatTone::Balanced,
        }
    }
}

fn main() {
    let args = CliArgs::parse();

    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    if config.features.debug {
        init_tracing("DEBUG");
    } else {
        init_tracing(&config.features.log_level);
    }
    let runtime = build_runtime();

    let code = runtime.block_on(async move { run(config, args).await });
    std::process::exit(code);
}

fn build_runtime() -> tokio::runtime::Runtime {
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: ClientConfig, args: CliArgs) -> i32 {
    let tone = args.tone.map(ChatTone::from).unwrap_or(config.exchange.chat_tone);
    let client = match BingChatClient::new(config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to build client: {err}");
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling exchange");
            ctrl_c_cancel.cancel();
        }
    });

    let mode = if args.compose {
        ExchangeMode::Compose {
            tone: Default::default(),
            format: Default::default(),
            length: Default::default(),
        }
    } else {
        ExchangeMode::Chat { tone }
    };
    let options = SendOptions {
        mode,
        tracking: if args.track {
            Tracking::New
        } else {
            Tracking::Untracked
        },
        cancel: Some(cancel),
        on_progress: Some(Box::new(|delta: &str| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        })),
        ..SendOptions::default()
    };

    match client.send_message(&args.message.join(" "), options).await {
        Ok(response) => {
            println!();
            eprintln!("conversation_id: {}", response.conversation_id);
            eprintln!("conversation_signature: {}", response.conversation_signature);
            eprintln!("client_id: {}", response.client_id);
            eprintln!("invocation_id: {}", response.invocation_id);
            if let Some(tracked) = &response.tracked {
                eprintln!("conversation_handle: {}", tracked.conversation_handle);
                eprintln!("parent_message_id: {}", tracked.message_id);
            }
            0
        }
        Err(err) => {
            println!();
            eprintln!("Exchange failed: {err}");
            1
        }
    }
}
