mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mcp::Session;
use runtime::{Backend, Orchestrator, ToolCatalog};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, Secrets};
use error::Result;

const CONFIG_FILE: &str = "toolrelay.toml";
const ENV_FILE: &str = ".env";
const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "q"];

#[derive(Parser)]
#[command(name = "toolrelay")]
#[command(about = "Chat with a language model that can call MCP server tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (default: ./toolrelay.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// Answer a single query and exit
    Ask {
        /// The query to send
        query: String,
    },
    /// List the tools the configured server offers
    Tools,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(CONFIG_FILE)?,
    };
    let secrets = Secrets::from_process(ENV_FILE)?;

    match cli.command {
        Some(Commands::Tools) => {
            let session = connect(&config, &secrets).await?;
            let result = cmd_tools(&session).await;
            close(&session).await;
            result
        }
        command => {
            // Both secrets are checked before the server is started.
            let provider = config.provider(&secrets)?;
            let session = connect(&config, &secrets).await?;
            info!(backend = %provider, "completion backend ready");
            let orchestrator = Orchestrator::with_config(provider, config.orchestrator_config());

            let result = match command {
                Some(Commands::Ask { query }) => cmd_ask(&orchestrator, &session, &query).await,
                _ => cmd_chat(&orchestrator, &session).await,
            };
            close(&session).await;
            result
        }
    }
}

async fn connect(config: &Config, secrets: &Secrets) -> Result<Session> {
    let server = config.server_config(secrets)?;
    info!(server = %server.name, command = %server.command, "starting tool server");
    Ok(Session::spawn(server).await?)
}

async fn close(session: &Session) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close tool server session");
    }
}

async fn cmd_tools(session: &Session) -> Result<()> {
    let catalog = ToolCatalog::refresh(session).await?;

    if catalog.is_empty() {
        println!("{} offers no tools.", session.name());
        return Ok(());
    }

    for tool in catalog.descriptors() {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("{:<32}  {summary}", tool.name);
    }
    Ok(())
}

async fn cmd_ask<B: Backend>(
    orchestrator: &Orchestrator<B>,
    session: &Session,
    query: &str,
) -> Result<()> {
    let output = process_query(orchestrator, session, query).await?;
    println!("{output}");
    Ok(())
}

async fn cmd_chat<B: Backend>(orchestrator: &Orchestrator<B>, session: &Session) -> Result<()> {
    println!("toolrelay v{}", env!("CARGO_PKG_VERSION"));

    let catalog = ToolCatalog::refresh(session).await?;
    println!(
        "Connected to {} server. Available tools: [{}]",
        session.name(),
        catalog.names().collect::<Vec<_>>().join(", ")
    );
    println!("Type your queries or 'quit' to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("Query: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }

        match process_query(orchestrator, session, input).await {
            Ok(output) => println!("\n{output}\n"),
            Err(e) => eprintln!("\nError processing query: {e}\n"),
        }
    }

    println!("\nSession ended.");
    Ok(())
}

/// Answer one query against the session's current tools.
async fn process_query<B: Backend>(
    orchestrator: &Orchestrator<B>,
    session: &Session,
    query: &str,
) -> Result<String> {
    let catalog = ToolCatalog::refresh(session).await?;
    let outcome = orchestrator.run(query, &catalog, session).await?;
    debug!(
        turns = outcome.turns,
        truncated = outcome.truncated,
        input_tokens = outcome.usage.input_tokens,
        output_tokens = outcome.usage.output_tokens,
        "query finished"
    );
    Ok(outcome.output)
}

/// Whether `input` asks to leave the chat loop.
fn is_exit(input: &str) -> bool {
    let input = input.trim();
    EXIT_COMMANDS
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}
