//! Starting evaluator processes and connecting to REPL servers.

use std::{net::Ipv4Addr, process::Stdio};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    process::Command,
};

use crate::command::{CommandBuildError, CommandParts};

/// Boxed read half of a connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Launch error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Cannot connect to localhost:{port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Command build error: {0}")]
    Command(#[from] CommandBuildError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bidirectional channel to one REPL.
pub struct Connection {
    /// What the REPL prints.
    pub reader: BoxReader,
    /// What the REPL reads.
    pub writer: BoxWriter,
    /// Secondary output (stderr of a spawned process).
    pub diagnostics: Option<BoxReader>,
    /// Spawned process, when this connection owns one.
    pub child: Option<AsyncGroupChild>,
    /// Port, when this connection reached an already-running REPL server.
    pub port: Option<u16>,
}

impl Connection {
    /// Wrap any duplex stream.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            diagnostics: None,
            child: None,
            port: None,
        }
    }

    /// Record the port this connection was made to.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Starts evaluators and connects to them.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn a new evaluator. When `listen_port` is set the command already
    /// asks the evaluator to open a REPL server on that port.
    async fn spawn(
        &self,
        command: &CommandParts,
        listen_port: Option<u16>,
    ) -> Result<Connection, LaunchError>;

    /// Connect to a REPL server on the loopback interface.
    async fn connect(&self, port: u16) -> Result<Connection, LaunchError>;
}

/// Launcher for real evaluator processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(
        &self,
        command: &CommandParts,
        listen_port: Option<u16>,
    ) -> Result<Connection, LaunchError> {
        if let Some(port) = listen_port {
            ensure_port_free(port)?;
        }

        let (program, args) = command.clone().into_resolved().await?;
        tracing::debug!(program = %program.display(), ?args, "Spawning evaluator");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .env("TERM", "dumb")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .group_spawn()
            .map_err(|e| LaunchError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let inner = child.inner();
        let stdin = inner
            .stdin
            .take()
            .ok_or_else(|| LaunchError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = inner
            .stdout
            .take()
            .ok_or_else(|| LaunchError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = inner.stderr.take();

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            diagnostics: stderr.map(|s| Box::new(s) as BoxReader),
            child: Some(child),
            port: None,
        })
    }

    async fn connect(&self, port: u16) -> Result<Connection, LaunchError> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| LaunchError::Connect { port, source })?;
        stream.set_nodelay(true)?;
        Ok(Connection::from_stream(stream).with_port(port))
    }
}

/// Fail with [`LaunchError::PortInUse`] if something already listens on
/// `port`.
fn ensure_port_free(port: u16) -> Result<(), LaunchError> {
    match std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(LaunchError::PortInUse(port)),
        Err(e) => Err(LaunchError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_port_in_use_is_detected() {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(matches!(ensure_port_free(port), Err(LaunchError::PortInUse(p)) if p == port));
        drop(listener);
    }

    #[tokio::test]
    async fn test_spawn_rejects_busy_port_before_spawning() {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let command = CommandParts::new("guix-bridge-no-such-program".into(), vec![]);
        let result = ProcessLauncher.spawn(&command, Some(port)).await;
        assert!(matches!(result, Err(LaunchError::PortInUse(_))));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let command = CommandParts::new("guix-bridge-no-such-program".into(), vec![]);
        let result = ProcessLauncher.spawn(&command, None).await;
        assert!(matches!(
            result,
            Err(LaunchError::Command(CommandBuildError::ExecutableNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_connect_reaches_listener() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"scheme@(guile-user)> ").await.unwrap();
        });

        let mut connection = ProcessLauncher.connect(port).await.unwrap();
        assert_eq!(connection.port, Some(port));
        let mut buf = String::new();
        connection.reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "scheme@(guile-user)> ");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = ProcessLauncher.connect(port).await;
        assert!(matches!(result, Err(LaunchError::Connect { .. })));
    }
}
