//! aion - terminal console for the AION agent task platform

mod commands;
mod style;

use aion::ClientConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use style::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aion", version, about = "Submit prompts to AION agents and follow their results")]
struct Cli {
    /// Backend base URL
    #[arg(long, global = true, env = "AION_API_URL")]
    api_url: Option<String>,

    /// TOML config file
    #[arg(long, global = true, env = "AION_CONFIG")]
    config: Option<PathBuf>,

    /// Poll for results only, without the live update channel
    #[arg(long, global = true)]
    no_push: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the session
    Login {
        #[arg(short, long, env = "AION_USERNAME")]
        username: Option<String>,
        /// Read from the terminal when omitted
        #[arg(long, env = "AION_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Show the logged-in identity
    Whoami,
    /// List available agents
    Agents,
    /// Submit a prompt and wait for its result
    Run {
        /// Agent id or name (first listed agent when omitted)
        #[arg(short, long)]
        agent: Option<String>,
        #[arg(short, long)]
        priority: Option<u32>,
        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

pub fn print_banner() {
    println!();
    println!("  {}", style_bold(&style_cyan("AION")) + &style_dim("  agent task console"));
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::from_env(),
    };
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if cli.no_push {
        config.push_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Login { username, password } => {
            commands::login::run(config, username, password).await
        }
        Command::Logout => commands::logout::run(config),
        Command::Whoami => commands::whoami::run(config).await,
        Command::Agents => commands::agents::run(config).await,
        Command::Run {
            agent,
            priority,
            prompt,
        } => commands::run::run(config, agent, priority, prompt.join(" ")).await,
        Command::Config => commands::config::run(&config),
    }
}
