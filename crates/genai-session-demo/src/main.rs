//! Command-line front end: one-shot streaming, a stdin chat loop, or a single
//! live-session turn against Gemini.

mod observability;

use std::error::Error;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt as _;
use genai_session::prelude::*;
use genai_session::vendors::gemini::{GeminiClientConfig, GeminiLiveConnector, GeminiProvider};
use genai_session::{DEFAULT_MODEL, ResponseModality};
use tokio::io::AsyncBufReadExt as _;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "genai-session-demo",
    about = "Stream Gemini responses from the command line"
)]
struct Args {
    /// Prompt text; words are joined with spaces.
    prompt: Vec<String>,
    /// Model id.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// System instruction for the session.
    #[arg(long)]
    system: Option<String>,
    /// JSON file holding a response contract; answers are validated against it.
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Sampling temperature (0.0 to 2.0).
    #[arg(long)]
    temperature: Option<f32>,
    /// Deadline for each call, in seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
    /// Read prompts line by line from stdin and keep one conversation.
    #[arg(long, conflicts_with = "live")]
    chat: bool,
    /// Send the prompt as one turn over a live session.
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    observability::init_logging();
    let args = Args::parse();

    let config = build_config(&args)?;
    let gemini = GeminiClientConfig::from_env()?;
    let client = Client::builder()
        .provider(Arc::new(GeminiProvider::new(gemini.clone())?))
        .live_connector(Arc::new(GeminiLiveConnector::new(gemini)))
        .build()?;
    info!(model = config.model(), chat = args.chat, live = args.live, "demo starting");

    let prompt = args.prompt.join(" ");
    if args.chat {
        return run_chat(client.session(config)).await;
    }
    if prompt.trim().is_empty() {
        return Err("a prompt is required (pass it as arguments or use --chat)".into());
    }
    if args.live {
        run_live(&client, &config, prompt).await
    } else {
        run_once(client.session(config), &prompt).await
    }
}

fn build_config(args: &Args) -> Result<SessionConfig, Box<dyn Error>> {
    let mut builder =
        SessionConfig::builder(&args.model).timeout(Duration::from_secs(args.timeout_secs));
    if let Some(system) = &args.system {
        builder = builder.system_instruction(system);
    }
    if let Some(path) = &args.schema {
        let raw = std::fs::read_to_string(path)?;
        let contract: SchemaContract = serde_json::from_str(&raw)?;
        builder = builder.response_schema(contract);
    }
    let mut params = GenerationParams::default();
    if let Some(temperature) = args.temperature {
        params = params.temperature(temperature);
    }
    if args.live {
        params = params.response_modality(ResponseModality::Text);
    }
    Ok(builder.generation(params).build()?)
}

async fn run_once(mut session: Session, prompt: &str) -> Result<(), Box<dyn Error>> {
    stream_to_stdout(&mut session, prompt).await?;
    print_structured(&session)
}

async fn run_chat(mut session: Session) -> Result<(), Box<dyn Error>> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    eprintln!("chat mode: /reset clears history, /exit quits");
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" => break,
            "/reset" => {
                session.reset_history(Vec::new());
                eprintln!("history cleared");
                continue;
            }
            _ => {}
        }
        if let Err(err) = stream_to_stdout(&mut session, line.trim()).await {
            eprintln!("error: {err}");
            continue;
        }
        if let Err(err) = print_structured(&session) {
            eprintln!("error: {err}");
        }
    }
    info!(messages = session.history().len(), "chat finished");
    Ok(())
}

async fn stream_to_stdout(session: &mut Session, prompt: &str) -> Result<(), SessionError> {
    let mut stream = session.stream(prompt).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next_chunk().await {
        let chunk = chunk?;
        let _ = write!(stdout, "{chunk}");
        let _ = stdout.flush();
    }
    let _ = writeln!(stdout);
    Ok(())
}

fn print_structured(session: &Session) -> Result<(), Box<dyn Error>> {
    if session.config().response_schema().is_none() {
        return Ok(());
    }
    if let FinalOutput::Record(record) = session.structured_output()? {
        println!("{}", serde_json::to_string_pretty(&record.into_value())?);
    }
    Ok(())
}

async fn run_live(
    client: &Client,
    config: &SessionConfig,
    prompt: String,
) -> Result<(), Box<dyn Error>> {
    client
        .with_live(config, |live| {
            async move {
                live.send_user_input(prompt, true).await?;
                let mut events = live.receive_turn()?;
                let mut stdout = std::io::stdout();
                while let Some(event) = events.next_event().await {
                    match event? {
                        LiveServerEvent::Content(content) => {
                            if let Some(text) = content.text() {
                                let _ = write!(stdout, "{text}");
                                let _ = stdout.flush();
                            }
                        }
                        LiveServerEvent::GoAway { time_left } => {
                            warn!(?time_left, "server is about to end the live session");
                        }
                        other => debug!(?other, "live event"),
                    }
                }
                let _ = writeln!(stdout);
                Ok(())
            }
            .boxed()
        })
        .await?;
    Ok(())
}
