//! Evaluate Guile expressions through the Guix REPL bridge.
//!
//! Run with: cargo run -p guix-eval -- eval "(+ 1 2)"
//!
//! Other forms:
//!   guix-eval call package-name "'hello"
//!   guix-eval submit "(display \"hi\")"

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use guix_bridge::{
    Arg, BridgeConfig, Call, ConnectionManager, Notifier, Role, SessionEvent, TracingNotifier,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "guix-eval", version, about = "Evaluate Guile code in a Guix REPL")]
struct Cli {
    /// Configuration file (defaults to the user's guix-bridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a single evaluator for both sessions
    #[arg(long)]
    no_server: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate an expression and print its decoded value as JSON
    Eval {
        /// Guile source
        source: String,
        /// Evaluate several top-level forms as one body
        #[arg(short, long)]
        wrap: bool,
        /// Print the raw value strings instead of decoding them
        #[arg(short, long)]
        raw: bool,
    },
    /// Call a procedure with literal arguments
    Call {
        /// Procedure name
        function: String,
        /// Arguments: #t, #f, (), #:keyword, 'symbol, numbers, or strings
        args: Vec<String>,
    },
    /// Run an interactive operation in the main session and stream its output
    Submit {
        /// Guile source
        source: String,
    },
}

/// Forwards events to the log and to a channel the CLI waits on.
struct ChannelNotifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &SessionEvent) {
        TracingNotifier.notify(event);
        let _ = self.tx.send(event.clone());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BridgeConfig::load_default()?,
    };
    if cli.no_server {
        config.server_mode = false;
    }

    let (tx, mut events) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(config)?.with_notifier(Arc::new(ChannelNotifier { tx }));

    let result = match cli.command {
        Command::Eval { source, wrap, raw } => {
            if raw {
                for value in manager.evaluate(&source, wrap).await? {
                    println!("{value}");
                }
            } else {
                let value = manager.evaluate_and_decode(&source, wrap).await?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Ok(())
        }
        Command::Call { function, args } => {
            let call = Call::with_args(function, args.iter().map(String::as_str).map(parse_arg));
            tracing::debug!(%call, "Calling");
            let value = manager.call_and_decode(&call).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Submit { source } => submit(&manager, &source, &mut events).await,
    };

    manager.shutdown().await;
    result
}

async fn submit(
    manager: &ConnectionManager,
    source: &str,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> anyhow::Result<()> {
    let session = manager.ensure_session(Role::Main).await?;
    let mut output = session.transcript().live_output();
    manager.submit(source).await?;

    loop {
        tokio::select! {
            biased;
            chunk = output.next() => match chunk {
                Some(text) => print!("{text}"),
                None => anyhow::bail!("{} closed", session.display_name()),
            },
            event = events.recv() => match event {
                Some(SessionEvent::OperationFinished { session: id, .. }) if id == session.id() => {
                    println!();
                    return Ok(());
                }
                Some(_) => {}
                None => anyhow::bail!("Notifier went away"),
            },
        }
    }
}

/// Read a command-line argument as a call argument.
fn parse_arg(text: &str) -> Arg {
    match text {
        "#t" => Arg::True,
        "#f" => Arg::False,
        "()" => Arg::Nil,
        _ => {
            if let Some(name) = text.strip_prefix("#:") {
                Arg::keyword(name)
            } else if let Some(name) = text.strip_prefix('\'') {
                Arg::symbol(name)
            } else if let Ok(n) = text.parse::<i64>() {
                Arg::Int(n)
            } else if let Ok(x) = text.parse::<f64>() {
                Arg::Float(x)
            } else {
                Arg::from(text)
            }
        }
    }
}
