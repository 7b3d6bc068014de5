//! In-memory evaluator for driving the connection manager in tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use guix_bridge::{
    BridgeConfig, Notifier, SessionEvent, Value, decode, manager::ConnectionManager,
};
use guix_bridge_core::value::quote_string;
use guix_bridge_repl::{CommandParts, Connection, LaunchError, Launcher};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    sync::watch,
};

pub const PROMPT: &str = "scheme@(guile-user)> ";

/// Launcher whose evaluators are tasks speaking the REPL protocol over
/// in-memory pipes.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    spawned: AtomicUsize,
    connected: AtomicUsize,
    silent: AtomicBool,
    busy_ports: Mutex<HashSet<u16>>,
    servers: Mutex<HashMap<u16, watch::Receiver<bool>>>,
    commands: Mutex<Vec<CommandParts>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluators started from now on never show a prompt.
    pub fn silent(self) -> Self {
        self.state.silent.store(true, Ordering::SeqCst);
        self
    }

    /// Pretend something else already listens on `port`.
    pub fn with_busy_port(self, port: u16) -> Self {
        self.state.busy_ports.lock().unwrap().insert(port);
        self
    }

    pub fn spawned(&self) -> usize {
        self.state.spawned.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> usize {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<CommandParts> {
        self.state.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn spawn(
        &self,
        command: &CommandParts,
        listen_port: Option<u16>,
    ) -> Result<Connection, LaunchError> {
        self.state.commands.lock().unwrap().push(command.clone());
        if let Some(port) = listen_port {
            if self.state.busy_ports.lock().unwrap().contains(&port) {
                return Err(LaunchError::PortInUse(port));
            }
        }
        self.state.spawned.fetch_add(1, Ordering::SeqCst);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (alive_tx, alive_rx) = watch::channel(true);
        if let Some(port) = listen_port {
            self.state.servers.lock().unwrap().insert(port, alive_rx);
        }

        let silent = self.state.silent.load(Ordering::SeqCst);
        tokio::spawn(async move {
            serve(theirs, silent, None).await;
            alive_tx.send_replace(false);
        });
        Ok(Connection::from_stream(ours))
    }

    async fn connect(&self, port: u16) -> Result<Connection, LaunchError> {
        let alive = self
            .state
            .servers
            .lock()
            .unwrap()
            .get(&port)
            .filter(|alive| *alive.borrow())
            .cloned()
            .ok_or_else(|| LaunchError::Connect {
                port,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })?;
        self.state.connected.fetch_add(1, Ordering::SeqCst);

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(theirs, false, Some(alive)));
        Ok(Connection::from_stream(ours).with_port(port))
    }
}

/// Run one REPL until its input closes, `(exit)` arrives, or the owning
/// evaluator goes away.
async fn serve(stream: DuplexStream, silent: bool, mut owner: Option<watch::Receiver<bool>>) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    if silent {
        while let Ok(Some(_)) = lines.next_line().await {}
        return;
    }
    if writer
        .write_all(format!("GNU Guile 3.0.9\n{PROMPT}").as_bytes())
        .await
        .is_err()
    {
        return;
    }

    loop {
        let line = match owner.as_mut() {
            Some(owner) => tokio::select! {
                line = lines.next_line() => line,
                _ = owner.wait_for(|up| !up) => return,
            },
            None => lines.next_line().await,
        };
        let Ok(Some(line)) = line else { return };
        if line.trim() == "(exit)" {
            return;
        }
        let text = respond(&line).await;
        if writer
            .write_all(format!("{text}{PROMPT}").as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn respond(line: &str) -> String {
    if line.starts_with("(begin (define (guix-bridge-error-message") {
        return String::new();
    }
    let request = decode(line).ok();
    let source = request
        .as_ref()
        .and_then(Value::as_list)
        .filter(|items| items.first().and_then(Value::as_symbol) == Some("guix-bridge-eval"))
        .and_then(|items| items.get(1))
        .and_then(Value::as_str);
    let Some(source) = source else {
        // Typed at the prompt: echo, then run it for its output only.
        let mut output = String::new();
        if let Ok(form) = decode(line) {
            let _ = eval(&form, &mut output).await;
        }
        return format!("; {line}\n{output}");
    };

    let mut output = String::new();
    let outcome = match decode(source) {
        Ok(form) => eval(&form, &mut output).await,
        Err(e) => Err(("read-error".to_string(), format!("read-error: {e}"))),
    };
    match outcome {
        Ok(value) => format!(
            "((result {}) (output . {}))\n",
            quote_string(&value),
            quote_string(&output)
        ),
        Err((key, msg)) => format!(
            "((error (key . {key}) (msg . {})) (output . {}))\n",
            quote_string(&msg),
            quote_string(&output)
        ),
    }
}

/// A tiny evaluator: literals, `quote`, `begin`, `display`, `list`,
/// `sleep-then` and `current-module`. Anything else is unbound.
fn eval<'a>(
    form: &'a Value,
    output: &'a mut String,
) -> BoxFuture<'a, Result<String, (String, String)>> {
    Box::pin(async move {
        let items = match form {
            Value::Symbol(name) => return Err(unbound(name)),
            Value::List(items) => items,
            other => return Ok(other.to_string()),
        };
        let head = items.first().and_then(Value::as_symbol).unwrap_or_default();
        let args = &items[1..];
        match head {
            "quote" => Ok(args.first().map(ToString::to_string).unwrap_or_default()),
            "begin" => {
                let mut last = "#<unspecified>".to_string();
                for arg in args {
                    last = eval(arg, output).await?;
                }
                Ok(last)
            }
            "display" => {
                if let Some(arg) = args.first() {
                    output.push_str(arg.as_str().unwrap_or(&arg.to_string()));
                }
                Ok("#<unspecified>".to_string())
            }
            "list" => {
                let mut printed = Vec::new();
                for arg in args {
                    printed.push(eval(arg, output).await?);
                }
                Ok(format!("({})", printed.join(" ")))
            }
            "sleep-then" => {
                let ms = args.first().and_then(Value::as_i64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms.unsigned_abs())).await;
                match args.get(1) {
                    Some(arg) => eval(arg, output).await,
                    None => Ok("#<unspecified>".to_string()),
                }
            }
            "current-module" => Ok("#<directory (guile-user) 7f3a2c1e8f00>".to_string()),
            other => Err(unbound(other)),
        }
    })
}

fn unbound(name: &str) -> (String, String) {
    (
        "unbound-variable".to_string(),
        format!("unbound-variable: Unbound variable: {name}"),
    )
}

/// Notifier that remembers every event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn config() -> BridgeConfig {
    BridgeConfig {
        startup_timeout_ms: 2_000,
        ..BridgeConfig::default()
    }
}

pub fn manager(launcher: &FakeLauncher) -> ConnectionManager<FakeLauncher> {
    ConnectionManager::with_launcher(config(), launcher.clone()).unwrap()
}

pub fn collapsed_manager(launcher: &FakeLauncher) -> ConnectionManager<FakeLauncher> {
    let config = BridgeConfig {
        server_mode: false,
        ..config()
    };
    ConnectionManager::with_launcher(config, launcher.clone()).unwrap()
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
