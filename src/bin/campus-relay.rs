use clap::{ArgAction, Parser};

use campus_relay::logging::{init_logging, LogLevel};
use campus_relay::{server, RelayConfig};

/// Relay between the campus chat UI and its Rasa / Gemini backends.
#[derive(Parser, Debug)]
#[command(name = "campus-relay", version)]
struct Cli {
    /// Listen address; overrides RELAY_BIND / PORT
    #[arg(long)]
    bind: Option<String>,

    /// Bot server base URL; overrides RASA_SERVER_URL
    #[arg(long)]
    bot_url: Option<String>,

    /// Only log errors
    #[arg(long, short)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_flags(cli.verbose, cli.quiet));

    let mut config = RelayConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(bot_url) = cli.bot_url {
        config.bot_url = Some(bot_url);
    }
    tracing::debug!(?config, "loaded configuration");

    server::serve(&config).await?;
    Ok(())
}
