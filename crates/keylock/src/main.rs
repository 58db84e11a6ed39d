//! keylock CLI
//!
//! Acquire, release, extend and inspect named locks from the shell.
//!
//! # Exit Codes
//!
//! - `0` - the operation took effect (or, for `status`, the read succeeded)
//! - `1` - contention: the lock is held elsewhere, or the caller is not the owner
//! - error exit - configuration or store failure
//!
//! # Example
//!
//! ```bash
//! owner=$(keylock acquire jobs:nightly --lease-seconds 60) || exit 0
//! run-nightly-job
//! keylock release jobs:nightly --owner "$owner"
//! ```

#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keylock::config::{Config, LogFormat};
use keylock::{inspect, LeaseLock, OwnerToken, RedisConnection};
use secrecy::ExposeSecret;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// keylock - lease-based distributed locks on Redis
#[derive(Parser)]
#[command(name = "keylock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store URL
    #[arg(long, global = true, env = "REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Try once to acquire a lock; prints the owner token on success
    Acquire {
        /// Lock name
        name: String,

        /// Owner token (random if omitted)
        #[arg(long)]
        owner: Option<String>,

        /// Lease in seconds (default: KEYLOCK_LEASE_SECONDS or 30)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        lease_seconds: Option<u64>,
    },

    /// Release a lock if the owner still holds it
    Release {
        /// Lock name
        name: String,

        /// Owner token returned by `acquire`
        #[arg(long)]
        owner: String,
    },

    /// Reset the lease on a lock if the owner still holds it
    Extend {
        /// Lock name
        name: String,

        /// Owner token returned by `acquire`
        #[arg(long)]
        owner: String,

        /// New lease in seconds (default: KEYLOCK_LEASE_SECONDS or 30)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        lease_seconds: Option<u64>,
    },

    /// Show the current holder and remaining lease
    Status {
        /// Lock name
        name: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cache the lock scripts on the store ahead of first use
    LoadScripts,
}

fn init_tracing(format: LogFormat) {
    // Logs go to stderr; stdout carries command output
    let (text, json) = match format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keylock=info".into()),
        )
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut vars: HashMap<String, String> = std::env::vars().collect();
    if let Some(url) = cli.redis_url {
        vars.insert("REDIS_URL".to_string(), url);
    }
    let config = Config::from_vars(&vars)?;

    init_tracing(config.log_format);

    let mut conn = RedisConnection::open(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    let lock = LeaseLock::new();
    let lease_or_default = |seconds: Option<u64>| {
        seconds
            .map(Duration::from_secs)
            .unwrap_or(config.default_lease)
    };

    match cli.command {
        Commands::Acquire {
            name,
            owner,
            lease_seconds,
        } => {
            let owner = owner.map_or_else(OwnerToken::generate, OwnerToken::from);
            let lease = lease_or_default(lease_seconds);

            if lock.acquire(&mut conn, &name, &owner, lease).await? {
                info!(lock = %name, lease_secs = lease.as_secs(), "Lock acquired");
                println!("{owner}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("lock {name} is held by another owner");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Release { name, owner } => {
            if lock.release(&mut conn, &name, &OwnerToken::from(owner)).await? {
                info!(lock = %name, "Lock released");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("lock {name} is not held by this owner");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Extend {
            name,
            owner,
            lease_seconds,
        } => {
            let lease = lease_or_default(lease_seconds);
            if lock
                .extend(&mut conn, &name, &OwnerToken::from(owner), lease)
                .await?
            {
                info!(lock = %name, lease_secs = lease.as_secs(), "Lease extended");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("lock {name} is not held by this owner");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Status { name, json } => {
            let status = inspect(&mut conn, &name).await?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("name:   {}", status.name);
                println!("holder: {}", status.holder.as_deref().unwrap_or("-"));
                match status.ttl {
                    Some(ttl) => println!("ttl:    {}ms", ttl.as_millis()),
                    None => println!("ttl:    -"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::LoadScripts => {
            for script in [lock.release_script(), lock.extend_script()] {
                script.load(&mut conn).await?;
                println!("{}", script.hash());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
