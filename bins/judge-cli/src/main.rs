mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "judge-cli")]
#[command(about = "Judge CLI - Run code against problems locally in sandboxed containers", long_about = None)]
struct Cli {
    /// Languages config file (falls back to built-in defaults when missing)
    #[arg(long, global = true, env = "JUDGE_LANGUAGES_CONFIG", default_value = "config/languages.json")]
    languages: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a source file against the problem's sample tests
    Run {
        #[command(flatten)]
        target: commands::Target,
    },

    /// Judge a source file against every test of the problem
    Submit {
        #[command(flatten)]
        target: commands::Target,
    },

    /// List configured languages with their images and limits
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { target } => {
            let passed = commands::judge(&cli.languages, &target, commands::Mode::Run).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Commands::Submit { target } => {
            let passed = commands::judge(&cli.languages, &target, commands::Mode::Submit).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Commands::Languages => {
            commands::list_languages(&cli.languages)?;
        }
    }

    Ok(())
}
