use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use defender::tracker::ChannelHook;
use defender::{Defender, DefenderConfig};

/// Reads one client key per line from stdin and prints whether it is banned.
#[derive(Debug, Parser)]
#[command(name = "defender", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Events allowed per window
    #[arg(long)]
    max: Option<u32>,

    /// Window length in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Ban length in milliseconds
    #[arg(long)]
    ban_duration_ms: Option<u64>,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Serialize)]
struct Decision<'a> {
    key: &'a str,
    banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BannedClient {
    key: String,
    until: chrono::DateTime<chrono::Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("defender=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = DefenderConfig::load(args.config.as_deref())?;
    if let Some(max) = args.max {
        config.max = max;
    }
    if let Some(duration_ms) = args.duration_ms {
        config.duration_ms = duration_ms;
    }
    if let Some(ban_duration_ms) = args.ban_duration_ms {
        config.ban_duration_ms = ban_duration_ms;
    }
    info!(
        max = config.max,
        duration_ms = config.duration_ms,
        ban_duration_ms = config.ban_duration_ms,
        eviction_factor = config.eviction_factor,
        "Configuration loaded"
    );

    // Ban notifications are handled outside the tracker lock
    let (hook, mut bans) = ChannelHook::new();
    let defender: Arc<Defender<String>> = Arc::new(config.builder().hook(hook).build()?);
    let notifier = tokio::spawn(async move {
        while let Some(event) = bans.recv().await {
            warn!(
                key = %event.key,
                remaining = ?event.until.saturating_duration_since(Instant::now()),
                "Client banned"
            );
        }
    });

    let (stop_eviction, eviction_stopped) = oneshot::channel::<()>();
    let eviction = defender.spawn_cleanup(async move {
        let _ = eviction_stopped.await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_segment() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };
        let Some(key) = parse_key(&line) else {
            continue;
        };

        let decision = match defender.check(&key) {
            Ok(banned) => Decision {
                key: &key,
                banned,
                error: None,
            },
            // A failed hook still means the client is banned
            Err(e) => Decision {
                key: &key,
                banned: e.is_hook(),
                error: Some(e.to_string()),
            },
        };
        print_decision(&decision, args.json)?;
    }

    let _ = stop_eviction.send(());
    eviction.await?;

    let now = Instant::now();
    let wall_now = chrono::Utc::now();
    let banned: Vec<BannedClient> = defender
        .ban_list()
        .into_iter()
        .map(|snapshot| BannedClient {
            until: wall_now
                + chrono::Duration::from_std(snapshot.remaining(now)).unwrap_or(chrono::Duration::zero()),
            key: snapshot.into_key(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string(&banned)?);
    } else {
        for client in &banned {
            println!("banned {} until {}", client.key, client.until.to_rfc3339());
        }
    }

    drop(defender);
    notifier.await?;

    info!("Defender stopped");
    Ok(())
}

/// Turn one raw input line into a key. Invalid UTF-8 is replaced rather
/// than rejected; blank lines yield `None`.
fn parse_key(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let key = line.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

fn print_decision(decision: &Decision<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(decision)?);
    } else {
        let verdict = if decision.banned { "banned" } else { "allowed" };
        match &decision.error {
            Some(error) => println!("{} {} ({})", decision.key, verdict, error),
            None => println!("{} {}", decision.key, verdict),
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
