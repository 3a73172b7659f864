//! talkstream: drive a talking-avatar stream from the terminal

mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use talkstream_core::config::DEFAULT_API_CONFIG_PATH;
use talkstream_core::{
    ApiConfig, ClientEvent, Script, StreamClient, StreamConfig, VoiceConfig, VERSION,
};
use talkstream_webrtc::WebRtcTransportFactory;

use crate::logging::{parse_log_level, setup_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "talkstream", version, about = "Stream a talking avatar and make it speak")]
struct Cli {
    /// Path to the API descriptor
    #[arg(short, long, env = "TALKSTREAM_CONFIG", default_value = DEFAULT_API_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TALKSTREAM_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Include span enter/exit events in logs
    #[arg(long)]
    log_spans: bool,

    /// Include source file and line in logs
    #[arg(long)]
    log_location: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the API descriptor without contacting the service
    Check,
    /// Open a stream, speak, and tear it down on Ctrl-C
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Utterances to speak in order; read from stdin, one per line, when omitted
    utterances: Vec<String>,

    /// Speak a pre-recorded audio file instead of text
    #[arg(long, conflicts_with = "utterances")]
    audio_url: Option<String>,

    /// Skip warm-up; the stream counts as ready right away
    #[arg(long)]
    no_warmup: bool,

    /// Treat utterances as SSML
    #[arg(long)]
    ssml: bool,

    /// Speech provider
    #[arg(long, default_value = "microsoft")]
    voice_provider: String,

    /// Provider voice id
    #[arg(long, default_value = "en-US-AndrewNeural")]
    voice_id: String,

    /// Seconds to wait for the stream to become ready
    #[arg(long, default_value_t = 30)]
    ready_timeout: u64,

    /// Close locally without deleting the remote session
    #[arg(long)]
    keep_remote: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    setup_logging(
        &LoggingConfig::new(level)
            .with_json(cli.json_logs)
            .with_file_info(cli.log_location)
            .with_spans(cli.log_spans),
    )?;
    info!("Starting talkstream v{}", VERSION);

    match cli.command {
        Commands::Check => check(&cli.config),
        Commands::Run(args) => run(&cli.config, args).await,
    }
}

fn load_api(path: &Path) -> Result<ApiConfig> {
    let api = ApiConfig::load(path)?;
    api.validate()
        .with_context(|| format!("{} is not usable", path.display()))?;
    Ok(api)
}

fn check(path: &Path) -> Result<()> {
    let api = load_api(path)?;
    println!("{}: ok ({} at {})", path.display(), api.service, api.base_url());
    Ok(())
}

async fn run(path: &Path, args: RunArgs) -> Result<()> {
    let api = load_api(path)?;
    let config = StreamConfig::default()
        .with_warmup(!args.no_warmup)
        .with_ssml(args.ssml)
        .with_voice(VoiceConfig::new(&args.voice_provider, &args.voice_id));

    let client = StreamClient::builder()
        .api(api)
        .config(config)
        .transport_factory(Arc::new(WebRtcTransportFactory::new()))
        .build()?;

    let printer = tokio::spawn(print_events(client.subscribe()));
    let mut events = client.subscribe();

    let service = client.connect().await.context("failed to open stream")?;
    println!("connected to {} (idle video: {})", service, client.idle_video_asset());

    let outcome = speak_all(&client, &mut events, &args).await;

    if outcome.is_ok() {
        println!("press Ctrl-C to end the session");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = wait_for_close(&mut events) => warn!("Session closed by transport"),
        }
    }

    if args.keep_remote {
        client.stop().await;
    } else {
        client.teardown().await;
    }
    printer.abort();
    outcome
}

async fn speak_all(
    client: &StreamClient,
    events: &mut broadcast::Receiver<ClientEvent>,
    args: &RunArgs,
) -> Result<()> {
    wait_until_ready(client, events, Duration::from_secs(args.ready_timeout)).await?;

    if let Some(audio_url) = &args.audio_url {
        return speak(client, Script::audio(audio_url.as_str())).await;
    }

    if !args.utterances.is_empty() {
        for text in &args.utterances {
            speak_line(client, text).await?;
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        speak_line(client, &line).await?;
    }
    Ok(())
}

/// Speak one utterance; a refused utterance is reported and skipped
async fn speak_line(client: &StreamClient, text: &str) -> Result<bool> {
    let spoken = client.send_utterance(text).await?;
    if !spoken {
        warn!(utterance = %text, "Utterance skipped; session not ready");
    }
    Ok(spoken)
}

async fn speak(client: &StreamClient, script: Script) -> Result<()> {
    if !client.send_script(script).await? {
        bail!("session refused the script");
    }
    Ok(())
}

async fn wait_until_ready(
    client: &StreamClient,
    events: &mut broadcast::Receiver<ClientEvent>,
    limit: Duration,
) -> Result<()> {
    if client.is_ready() {
        return Ok(());
    }

    let waited = tokio::time::timeout(limit, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::ReadinessChanged { ready: true }) => return Ok::<(), anyhow::Error>(()),
                Ok(ClientEvent::SessionClosed { reason }) => {
                    bail!("session closed before it became ready ({:?})", reason)
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if client.is_ready() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => bail!("client event bus closed"),
            }
        }
    })
    .await;

    match waited {
        Ok(result) => result,
        Err(_) => bail!("stream not ready after {}s", limit.as_secs()),
    }
}

async fn wait_for_close(events: &mut broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::SessionClosed { .. }) | Err(broadcast::error::RecvError::Closed) => return,
            _ => {}
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::StatusChanged { category, entry }) => {
                println!("[{}] {}", category, entry.text);
            }
            Ok(ClientEvent::ReadinessChanged { ready }) => println!("[ready] {}", ready),
            Ok(ClientEvent::VideoStateChanged { state, opacity }) => {
                println!("[video] {} (opacity {})", state, opacity);
            }
            Ok(ClientEvent::SessionStarted { stream_id, service }) => {
                println!("[session] {} stream {}", service, stream_id);
            }
            Ok(ClientEvent::SessionClosed { reason }) => println!("[session] closed: {:?}", reason),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
