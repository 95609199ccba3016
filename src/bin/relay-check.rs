//! Probes a bot deployment the way the chat UI uses it and prints a
//! pass/fail summary. The exit code only reflects whether a bot URL was
//! available, not whether the checks passed.

use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;

use campus_relay::logging::{init_logging, LogLevel};
use campus_relay::rasa::reply_text;
use campus_relay::{BotClient, CallOutcome, RelayConfig};

/// Check a Rasa deployment's status and webhook endpoints.
#[derive(Parser, Debug)]
#[command(name = "relay-check", version)]
struct Cli {
    /// Bot server base URL; defaults to RASA_SERVER_URL
    #[arg(long)]
    bot_url: Option<String>,

    /// Message sent to the webhook
    #[arg(long, default_value = "測試連接")]
    message: String,

    /// Sender id used for the webhook probe
    #[arg(long, default_value = "config-check")]
    sender: String,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

struct Check {
    name: &'static str,
    passed: bool,
    detail: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_flags(cli.verbose, cli.verbose == 0));

    let config = RelayConfig::from_env()?;
    let Some(bot_url) = cli.bot_url.or(config.bot_url) else {
        anyhow::bail!("no bot URL: pass --bot-url or set RASA_SERVER_URL");
    };
    let bot = BotClient::new(&bot_url)?;
    let cancel = CancellationToken::new();

    println!("🔍 Checking bot deployment at {}\n", bot.base_url());

    println!("1️⃣ GET {}", bot.status_url());
    let status = match bot.status(&cancel).await? {
        CallOutcome::Success { value, .. } => Check {
            name: "Status API",
            passed: true,
            detail: value.to_string(),
        },
        CallOutcome::Failure {
            reason,
            last_raw_message,
            ..
        } => Check {
            name: "Status API",
            passed: false,
            detail: format!("server unreachable ({reason}): {last_raw_message}"),
        },
    };
    print_check(&status);

    println!("2️⃣ POST {}", bot.webhook_url());
    let webhook = match bot.send_message(&cli.sender, &cli.message, &cancel).await? {
        CallOutcome::Success { value, .. } => Check {
            name: "Webhook API",
            passed: true,
            detail: reply_text(&value)
                .unwrap_or_else(|| format!("{} message(s), no text", value.len())),
        },
        CallOutcome::Failure {
            reason,
            last_raw_message,
            ..
        } => Check {
            name: "Webhook API",
            passed: false,
            detail: format!("{reason}: {last_raw_message}"),
        },
    };
    print_check(&webhook);

    println!("\n📊 Summary");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for check in [&status, &webhook] {
        let mark = if check.passed { "✅" } else { "❌" };
        let state = if check.passed { "OK" } else { "FAILED" };
        println!("{mark} {}: {state}", check.name);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}

fn print_check(check: &Check) {
    let mark = if check.passed { "✅" } else { "❌" };
    println!("   {mark} {}", check.detail);
}
