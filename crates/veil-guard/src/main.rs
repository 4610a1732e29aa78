//! Veil - hidden-content PIN CLI

use std::io::BufRead;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use veil_guard::{AccountId, GuardConfig, PinPolicyManager, PinStatus};

/// Veil - manage the PIN that guards hidden content
#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Set, verify, change and remove the hidden-content PIN")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account the PIN belongs to
    #[arg(long)]
    account: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a PIN is set and any active lockout
    Status,

    /// Set the PIN, replacing any existing one
    Set {
        /// PIN (read from stdin if omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Check a PIN
    Verify {
        /// PIN (read from stdin if omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Replace the PIN
    Change {
        /// Current PIN (first stdin line if omitted)
        #[arg(long)]
        current: Option<String>,

        /// New PIN (next stdin line if omitted)
        #[arg(long)]
        new: Option<String>,
    },

    /// Remove the PIN
    Remove {
        /// Current PIN (read from stdin if omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Show lockout counters
    Lockout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veil_guard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load or create config
    let config_path = std::env::var("VEIL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| GuardConfig::default_path());
    let config = GuardConfig::load_or_create(&config_path)?;
    config.ensure_directories()?;
    debug!("Using config at {:?}", config_path);

    let account = AccountId::new(cli.account)?;
    let manager = PinPolicyManager::new(
        account,
        config.policy.clone(),
        config.open_local_store()?,
        config.open_remote_store()?,
    );

    match cli.command {
        Commands::Status => {
            let status = manager.status().await?;
            match status {
                PinStatus::Unset => println!("PIN: not set"),
                PinStatus::Set => println!("PIN: set"),
                PinStatus::Locked { until } => println!("PIN: locked until {}", until.to_rfc3339()),
            }
        }

        Commands::Set { pin } => {
            let pin = pin_or_stdin(pin)?;
            manager.set_pin(&pin).await?;
            println!("PIN set");
        }

        Commands::Verify { pin } => {
            let pin = pin_or_stdin(pin)?;
            if !manager.verify_pin(&pin).await {
                let remaining = manager.remaining_lockout_time().await;
                if remaining.is_zero() {
                    anyhow::bail!("PIN rejected");
                }
                anyhow::bail!("PIN rejected (locked for {} seconds)", remaining.as_secs());
            }
            println!("PIN accepted");
        }

        Commands::Change { current, new } => {
            let current = pin_or_stdin(current)?;
            let new = pin_or_stdin(new)?;
            manager.change_pin(&current, &new).await?;
            println!("PIN changed");
        }

        Commands::Remove { pin } => {
            let pin = pin_or_stdin(pin)?;
            manager.remove_pin(&pin).await?;
            println!("PIN removed");
        }

        Commands::Lockout => {
            let state = manager.lockout_state().await;
            let now = chrono::Utc::now();
            println!("Failed attempts: {}", state.fail_count);
            println!("{}", config.policy.lockout.describe_lockout(&state, now));
        }
    }

    Ok(())
}

/// Take the PIN from the flag, or read one line from stdin
fn pin_or_stdin(pin: Option<String>) -> anyhow::Result<Zeroizing<String>> {
    if let Some(pin) = pin {
        return Ok(Zeroizing::new(pin));
    }

    let mut line = Zeroizing::new(String::new());
    let read = std::io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        anyhow::bail!("expected a PIN on stdin");
    }
    Ok(Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string()))
}
