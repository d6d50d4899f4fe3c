//! Taskboard Discord bot.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskboard::config::{BotConfig, ConfigSeverity};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Discord bot with live task and meeting boards.
#[derive(Parser)]
#[command(name = "taskboard", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to Discord and serve the boards (default).
    Run,
    /// Validate the configuration and exit.
    CheckConfig,
}

/// Install the fmt subscriber, plus a daily rolling file when `log_dir` is
/// set. The returned guard must live until exit so buffered lines flush.
fn init_logging(config: &BotConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("taskboard=info,reqwest=warn,tungstenite=warn"))
    };
    let stdout = tracing_subscriber::fmt::layer();

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taskboard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(stdout)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stdout)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(BotConfig::default_config_path);
    let config = BotConfig::load(&path)?;
    let _log_guard = init_logging(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut blocking = 0;
            for issue in config.validate() {
                match issue.severity {
                    ConfigSeverity::Warning => {
                        tracing::warn!("{}: {}", issue.title, issue.summary);
                    }
                    ConfigSeverity::Error => {
                        tracing::error!("{}: {}", issue.title, issue.summary);
                        blocking += 1;
                    }
                }
            }
            if blocking > 0 {
                anyhow::bail!("configuration has {blocking} blocking error(s); see log above");
            }
            tracing::info!("taskboard v{} starting", env!("CARGO_PKG_VERSION"));
            taskboard::runtime::run(config).await
        }
        Command::CheckConfig => {
            let issues = config.validate();
            println!("config: {}", path.display());
            println!("data dir: {}", config.data_dir().display());
            if issues.is_empty() {
                println!("no issues found");
                return Ok(());
            }
            for issue in &issues {
                println!(
                    "[{:?}] {} ({}): {}",
                    issue.severity, issue.title, issue.id, issue.summary
                );
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                anyhow::bail!("configuration has blocking errors");
            }
            Ok(())
        }
    }
}
