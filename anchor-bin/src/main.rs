use std::io::{self, Write};
use std::path::PathBuf;

use anchor_core::{
    config::InitOptions,
    init,
    model::{
        ChatCompletionOutput, ChatCompletionRequest, ChatMessage, EmbeddingRequest, ImageGenerateRequest, Role,
        SpeechRequest,
    },
    provider::{NullOpenAi, OpenAiApi},
    providers::openai::OpenAiClient,
    telemetry::{shutdown_metrics, shutdown_tracing},
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Traced OpenAI calls from the command line", long_about = None)]
struct Cli {
    /// Init options file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Service name on exported spans
    #[arg(long, global = true)]
    app: Option<String>,
    /// Deployment environment on exported spans
    #[arg(long, global = true)]
    env: Option<String>,
    /// OTLP endpoint; spans go to stdout without one
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Export each span as it ends instead of batching
    #[arg(long, global = true)]
    no_batch: bool,
    /// Use the canned in-process client instead of the network
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion request
    Chat {
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long, help = "Optional system prompt")]
        system: Option<String>,
        /// Print deltas as they arrive (not traced)
        #[arg(long)]
        stream: bool,
    },
    /// Send an embedding request
    Embed {
        #[arg(long, default_value = "text-embedding-3-small")]
        model: String,
        #[arg(short, long, help = "Input text")]
        input: Vec<String>,
    },
    /// Generate images from a prompt
    Image {
        #[arg(long)]
        model: Option<String>,
        #[arg(short, long)]
        prompt: String,
        #[arg(short, long)]
        n: Option<u32>,
    },
    /// Synthesize speech into a file
    Speech {
        #[arg(long, default_value = "tts-1")]
        model: String,
        #[arg(long, default_value = "alloy")]
        voice: String,
        #[arg(short, long)]
        input: String,
        #[arg(short, long, default_value = "speech.mp3")]
        out: PathBuf,
    },
}

fn load_options(cli: &Cli) -> anyhow::Result<InitOptions> {
    let mut opts = match &cli.config {
        Some(path) => InitOptions::from_path(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => InitOptions::default(),
    };
    if cli.app.is_some() {
        opts.application_name = cli.app.clone();
    }
    if cli.env.is_some() {
        opts.environment = cli.env.clone();
    }
    if cli.endpoint.is_some() {
        opts.otlp_endpoint = cli.endpoint.clone();
    }
    opts.disable_batch |= cli.no_batch;
    Ok(opts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let opts = load_options(&cli)?;

    let base: Box<dyn OpenAiApi> = if cli.offline || std::env::var("OPENAI_API_KEY").is_err() {
        tracing::info!("using the offline client");
        Box::new(NullOpenAi)
    } else {
        Box::new(OpenAiClient::from_env(&opts.http)?)
    };

    let anchor = init(&opts);
    if anchor.is_none() {
        tracing::warn!("telemetry unavailable; calls will not be traced");
    }
    let client: Box<dyn OpenAiApi> = match &anchor {
        Some(anchor) => Box::new(anchor.instrument_openai(base)),
        None => base,
    };

    run(cli.command, client.as_ref()).await?;

    if let Err(err) = shutdown_tracing() {
        tracing::warn!(error = %err, "tracer shutdown failed");
    }
    if let Err(err) = shutdown_metrics() {
        tracing::warn!(error = %err, "meter shutdown failed");
    }
    Ok(())
}

async fn run(command: Commands, client: &dyn OpenAiApi) -> anyhow::Result<()> {
    match command {
        Commands::Chat {
            model,
            message,
            system,
            stream,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::new(Role::System, system));
            }
            messages.push(ChatMessage::new(Role::User, message));
            let mut req = ChatCompletionRequest::new(model, messages);
            if stream {
                req.stream = Some(true);
            }

            match client.chat_completions_create(&req).await? {
                ChatCompletionOutput::Stream(mut chunks) => {
                    while let Some(chunk) = chunks.next().await {
                        let chunk = chunk?;
                        if let Some(text) = chunk.choices.first().and_then(|c| c.delta.content.as_deref()) {
                            print!("{text}");
                            io::stdout().flush().ok();
                        }
                    }
                    println!();
                }
                ChatCompletionOutput::Completion(completion) => {
                    println!("{}", completion.text().unwrap_or_default());
                }
            }
        }
        Commands::Embed { model, input } => {
            let req = EmbeddingRequest {
                model,
                input,
                ..Default::default()
            };
            let resp = client.embeddings_create(&req).await?;
            for e in &resp.data {
                println!("{} -> dim={}", e.index, e.embedding.len());
            }
        }
        Commands::Image { model, prompt, n } => {
            let req = ImageGenerateRequest {
                prompt,
                model,
                n,
                ..Default::default()
            };
            let resp = client.images_generate(&req).await?;
            for (i, image) in resp.data.iter().enumerate() {
                println!("{i} -> {}", image.url.as_deref().unwrap_or("<b64>"));
            }
        }
        Commands::Speech {
            model,
            voice,
            input,
            out,
        } => {
            let req = SpeechRequest {
                model,
                input,
                voice,
                ..Default::default()
            };
            let resp = client.audio_speech_create(&req).await?;
            std::fs::write(&out, &resp.audio)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("{} bytes -> {}", resp.audio.len(), out.display());
        }
    }
    Ok(())
}
