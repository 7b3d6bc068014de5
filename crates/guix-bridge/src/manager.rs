//! Session lifecycle and the evaluation entry points.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use guix_bridge_core::{
    Call, Notifier, Reply, Role, SessionEvent, Transcript, TracingNotifier, Value, decode,
};
use guix_bridge_repl::{
    Connection, LaunchError, Launcher, ProcessLauncher, PromptMatcher, Session, helper,
};
use tokio::{sync::Mutex, time::Instant};

use crate::{
    config::{BridgeConfig, ConfigError},
    error::BridgeError,
};

/// Delay between attempts to reach the main evaluator's REPL server.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Sessions {
    main: Option<Arc<Session>>,
    internal: Option<Arc<Session>>,
}

impl Sessions {
    const fn slot(&mut self, role: Role) -> &mut Option<Arc<Session>> {
        match role {
            Role::Main => &mut self.main,
            Role::Internal => &mut self.internal,
        }
    }
}

/// Owns the main and internal sessions and routes evaluations to them.
///
/// Sessions start lazily on first use and are replaced when found dead.
/// Dropping the manager kills every evaluator it spawned.
pub struct ConnectionManager<L: Launcher = ProcessLauncher> {
    config: BridgeConfig,
    prompt: PromptMatcher,
    launcher: L,
    notifier: Arc<dyn Notifier>,
    sessions: Mutex<Sessions>,
    transcripts: StdMutex<HashMap<Role, Arc<Transcript>>>,
}

impl ConnectionManager<ProcessLauncher> {
    /// Create a manager that spawns real evaluator processes.
    ///
    /// # Errors
    /// Returns error if the prompt pattern is invalid.
    pub fn new(config: BridgeConfig) -> Result<Self, ConfigError> {
        Self::with_launcher(config, ProcessLauncher)
    }
}

impl<L: Launcher> ConnectionManager<L> {
    /// Create a manager with a custom launcher.
    ///
    /// # Errors
    /// Returns error if the prompt pattern is invalid.
    pub fn with_launcher(config: BridgeConfig, launcher: L) -> Result<Self, ConfigError> {
        let prompt = config.prompt_matcher()?;
        Ok(Self {
            config,
            prompt,
            launcher,
            notifier: Arc::new(TracingNotifier),
            sessions: Mutex::new(Sessions::default()),
            transcripts: StdMutex::new(HashMap::new()),
        })
    }

    /// Replace the notifier that hears about session status changes.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The role that actually serves `role`: without server mode there is
    /// only the main session.
    #[must_use]
    pub const fn effective_role(&self, role: Role) -> Role {
        if self.config.server_mode {
            role
        } else {
            Role::Main
        }
    }

    /// Return the live session for `role`, starting one if needed.
    ///
    /// A dead session is discarded and replaced. Starting the internal
    /// session in server mode starts the main session first.
    ///
    /// # Errors
    /// Returns [`BridgeError::StartupFailure`] if a session cannot be started.
    pub async fn ensure_session(&self, role: Role) -> Result<Arc<Session>, BridgeError> {
        let role = self.effective_role(role);
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = self.live(&mut sessions, role).await {
            return Ok(session);
        }
        if role == Role::Internal && self.live(&mut sessions, Role::Main).await.is_none() {
            sessions.main = Some(self.start(Role::Main).await?);
        }

        let session = self.start(role).await?;
        *sessions.slot(role) = Some(Arc::clone(&session));
        Ok(session)
    }

    /// The current session for `role`, without starting one.
    pub async fn session(&self, role: Role) -> Option<Arc<Session>> {
        let role = self.effective_role(role);
        self.sessions.lock().await.slot(role).clone()
    }

    /// The transcript of the most recent session for `role`, including one
    /// that failed to start.
    #[must_use]
    pub fn transcript(&self, role: Role) -> Option<Arc<Transcript>> {
        let role = self.effective_role(role);
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&role)
            .cloned()
    }

    /// Terminate the session for `role`. Pending evaluations on it fail.
    pub async fn stop(&self, role: Role) {
        let role = self.effective_role(role);
        let session = self.sessions.lock().await.slot(role).take();
        if let Some(session) = session {
            session.terminate().await;
        }
    }

    /// Terminate every session.
    pub async fn shutdown(&self) {
        let (internal, main) = {
            let mut sessions = self.sessions.lock().await;
            (sessions.internal.take(), sessions.main.take())
        };
        for session in [internal, main].into_iter().flatten() {
            session.terminate().await;
        }
    }

    /// Evaluate `source` on the internal session and return the printed
    /// values. With `wrap`, several top-level forms are evaluated as one
    /// `begin` body.
    ///
    /// # Errors
    /// Returns [`BridgeError::Evaluation`] with the evaluator's diagnostic if
    /// evaluation raised an error or the session closed before replying.
    pub async fn evaluate(&self, source: &str, wrap: bool) -> Result<Vec<String>, BridgeError> {
        let session = self.ensure_session(Role::Internal).await?;
        let source = if wrap {
            helper::wrap_in_begin(source)
        } else {
            source.to_string()
        };
        tracing::debug!(role = %session.role(), session = %session.id(), %source, "Evaluating");

        match session
            .evaluate(&source)
            .await
            .map_err(|e| BridgeError::transport(&e))?
        {
            Reply::Success { values, output } => {
                if !output.is_empty() {
                    tracing::debug!(session = %session.id(), %output, "Evaluation output");
                }
                Ok(values)
            }
            Reply::Failure {
                key, diagnostic, ..
            } => Err(BridgeError::Evaluation { key, diagnostic }),
        }
    }

    /// Evaluate `source` and decode its first value. No value decodes to
    /// [`Value::Nil`].
    ///
    /// # Errors
    /// Returns error if evaluation fails or the value cannot be read.
    pub async fn evaluate_and_decode(&self, source: &str, wrap: bool) -> Result<Value, BridgeError> {
        let values = self.evaluate(source, wrap).await?;
        match values.first() {
            Some(raw) => Ok(decode(raw)?),
            None => Ok(Value::Nil),
        }
    }

    /// Evaluate a procedure call.
    ///
    /// # Errors
    /// Returns error if evaluation fails.
    pub async fn call(&self, call: &Call) -> Result<Vec<String>, BridgeError> {
        self.evaluate(&call.encode(), false).await
    }

    /// Evaluate a procedure call and decode its first value.
    ///
    /// # Errors
    /// Returns error if evaluation fails or the value cannot be read.
    pub async fn call_and_decode(&self, call: &Call) -> Result<Value, BridgeError> {
        self.evaluate_and_decode(&call.encode(), false).await
    }

    /// Send `source` to the main session as if typed there, without waiting
    /// for it to finish. The notifier hears
    /// [`SessionEvent::OperationFinished`] when the prompt returns.
    ///
    /// # Errors
    /// Returns error if the main session cannot be started or written to.
    pub async fn submit(&self, source: &str) -> Result<(), BridgeError> {
        let session = self.ensure_session(Role::Main).await?;
        tracing::debug!(session = %session.id(), %source, "Submitting");
        session
            .submit(source)
            .await
            .map_err(|e| BridgeError::transport(&e))
    }

    /// The registered session for `role` if it is still alive. A dead one is
    /// dropped from the table and terminated.
    async fn live(&self, sessions: &mut Sessions, role: Role) -> Option<Arc<Session>> {
        let slot = sessions.slot(role);
        if slot.as_ref().is_some_and(|s| s.is_alive()) {
            return slot.clone();
        }
        if let Some(stale) = slot.take() {
            self.notifier.notify(&SessionEvent::Discarded {
                role,
                session: stale.id(),
            });
            stale.terminate().await;
        }
        None
    }

    async fn start(&self, role: Role) -> Result<Arc<Session>, BridgeError> {
        self.notifier.notify(&SessionEvent::Starting { role });

        let transcript = Arc::new(Transcript::new());
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(role, Arc::clone(&transcript));

        let port = self.config.server_mode.then_some(self.config.listen_port);
        match self.launch(role, transcript).await {
            Ok(session) => {
                self.notifier.notify(&SessionEvent::Started {
                    role,
                    session: session.id(),
                });
                Ok(session)
            }
            Err(reason) => {
                let error = BridgeError::startup(role, port, reason);
                self.notifier.notify(&SessionEvent::StartupFailed {
                    role,
                    port,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Open a connection for `role` and bring the session up. Failures are
    /// returned as the reason shown to the user.
    async fn launch(&self, role: Role, transcript: Arc<Transcript>) -> Result<Arc<Session>, String> {
        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        let port = self.config.listen_port;

        let connection = match role {
            Role::Main => {
                let builder = self.config.command_builder();
                let command = if self.config.server_mode {
                    builder.build_listening(port)
                } else {
                    builder.build()
                }
                .map_err(|e| e.to_string())?;
                self.launcher
                    .spawn(&command, self.config.server_mode.then_some(port))
                    .await
                    .map_err(|e| e.to_string())?
            }
            Role::Internal => self
                .connect_with_retry(port, deadline)
                .await
                .map_err(|e| e.to_string())?,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        Session::start(
            role,
            connection,
            transcript,
            self.prompt.clone(),
            Arc::clone(&self.notifier),
            remaining,
        )
        .await
        .map_err(|e| {
            if role == Role::Main && self.config.server_mode {
                format!("{e}. Probably, port {port} is already in use")
            } else {
                e.to_string()
            }
        })
    }

    /// The main evaluator opens its REPL server some time after it starts,
    /// so refused connections are retried until `deadline`.
    async fn connect_with_retry(
        &self,
        port: u16,
        deadline: Instant,
    ) -> Result<Connection, LaunchError> {
        loop {
            match self.launcher.connect(port).await {
                Ok(connection) => return Ok(connection),
                Err(e) if Instant::now() + CONNECT_RETRY_INTERVAL < deadline => {
                    tracing::debug!(port, "REPL server not reachable yet: {e}");
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
