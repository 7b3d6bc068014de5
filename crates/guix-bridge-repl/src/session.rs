//! One live connection to an evaluator REPL.

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use command_group::AsyncGroupChild;
use guix_bridge_core::{
    Notifier, Reply, ReplyError, Role, SessionEvent, SessionId, Transcript, TranscriptEntry,
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
    time::Instant,
};
use uuid::Uuid;

use crate::{
    helper,
    launcher::{BoxReader, BoxWriter, Connection},
    prompt::PromptMatcher,
};

const READ_CHUNK: usize = 8192;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,
    #[error("No prompt within {0:?}")]
    StartupTimeout(Duration),
    #[error("Transcript lagged by {0} entries")]
    Lagged(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

/// A live connection to one evaluator, scoped to a role.
pub struct Session {
    id: SessionId,
    role: Role,
    port: Option<u16>,
    transcript: Arc<Transcript>,
    prompt: PromptMatcher,
    writer: Mutex<Option<BoxWriter>>,
    child: StdMutex<Option<AsyncGroupChild>>,
    closed: Arc<AtomicBool>,
    /// Output chunk count at the time the pending operation was sent.
    operation: watch::Sender<Option<u64>>,
    chunks: Arc<AtomicU64>,
    in_flight: Mutex<()>,
    input: StdMutex<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Take over `connection`, wait for the first prompt and install the
    /// evaluation helper.
    ///
    /// Everything the evaluator prints goes to `transcript`, which the
    /// caller keeps so a failed startup can still be inspected.
    ///
    /// # Errors
    /// Returns error if the banner prompt and the helper installation do not
    /// both finish within `startup_timeout`, or the connection closes first.
    pub async fn start(
        role: Role,
        connection: Connection,
        transcript: Arc<Transcript>,
        prompt: PromptMatcher,
        notifier: Arc<dyn Notifier>,
        startup_timeout: Duration,
    ) -> Result<Arc<Self>, SessionError> {
        let Connection {
            reader,
            writer,
            diagnostics,
            child,
            port,
        } = connection;

        let deadline = Instant::now() + startup_timeout;
        let id = Uuid::new_v4();
        let closed = Arc::new(AtomicBool::new(false));
        let chunks = Arc::new(AtomicU64::new(0));
        let (operation, _) = watch::channel(None);

        // Subscribe before the reader starts so the first prompt is seen.
        let mut startup_rx = transcript.subscribe();

        let mut tasks = vec![tokio::spawn(read_loop(ReadLoop {
            id,
            role,
            reader,
            transcript: Arc::clone(&transcript),
            prompt: prompt.clone(),
            closed: Arc::clone(&closed),
            operation: operation.clone(),
            chunks: Arc::clone(&chunks),
            notifier,
        }))];
        if let Some(diagnostics) = diagnostics {
            tasks.push(tokio::spawn(forward_diagnostics(
                diagnostics,
                Arc::clone(&transcript),
            )));
        }

        let session = Arc::new(Self {
            id,
            role,
            port,
            transcript,
            prompt,
            writer: Mutex::new(Some(writer)),
            child: StdMutex::new(child),
            closed,
            operation,
            chunks,
            in_flight: Mutex::new(()),
            input: StdMutex::new(String::new()),
            tasks,
        });

        let ready = tokio::time::timeout_at(deadline, async {
            session
                .collect_until_prompt(&mut startup_rx, String::new())
                .await?;
            session.exchange(&helper::helper_definition()).await
        })
        .await;
        match ready {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                session.terminate().await;
                return Err(e);
            }
            Err(_) => {
                session.terminate().await;
                return Err(SessionError::StartupTimeout(startup_timeout));
            }
        }

        tracing::info!(%role, session = %id, ?port, "Session ready");
        Ok(session)
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Port of the REPL server this session connected to, if any.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        self.role.display_name()
    }

    /// The session's transcript.
    #[must_use]
    pub fn transcript(&self) -> Arc<Transcript> {
        Arc::clone(&self.transcript)
    }

    /// Whether the evaluator is still there.
    pub fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut child = self
            .child
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match child.as_mut().map(AsyncGroupChild::try_wait) {
            Some(Ok(Some(status))) => {
                tracing::debug!(role = %self.role, session = %self.id, %status, "Evaluator exited");
                self.closed.store(true, Ordering::SeqCst);
                false
            }
            Some(Err(e)) => {
                tracing::debug!(role = %self.role, session = %self.id, "Cannot poll evaluator: {e}");
                false
            }
            Some(Ok(None)) | None => true,
        }
    }

    /// Whether an interactive operation has not yet returned to the prompt.
    #[must_use]
    pub fn operation_pending(&self) -> bool {
        self.operation.borrow().is_some()
    }

    /// Replace the partially typed input.
    pub fn set_input(&self, text: impl Into<String>) {
        *self
            .input
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = text.into();
    }

    /// The partially typed input.
    #[must_use]
    pub fn input(&self) -> String {
        self.input
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Evaluate `source` through the helper and wait for the reply.
    ///
    /// Calls on one session are served one at a time, in the order they
    /// acquired the session.
    ///
    /// # Errors
    /// Returns error if the session closes before replying or the reply is
    /// malformed.
    pub async fn evaluate(&self, source: &str) -> Result<Reply, SessionError> {
        let text = self.exchange(&helper::eval_request(source)).await?;
        let reply = Reply::parse(&text)?;
        tracing::debug!(
            role = %self.role,
            session = %self.id,
            success = reply.is_success(),
            "Evaluation finished"
        );
        Ok(reply)
    }

    /// Send `source` as if typed by the user and return immediately.
    ///
    /// Any partially typed input is discarded. Output goes to the
    /// transcript; the notifier hears `OperationFinished` at the next prompt.
    ///
    /// # Errors
    /// Returns error if the session is closed or the write fails.
    pub async fn submit(&self, source: &str) -> Result<(), SessionError> {
        let _guard = self.in_flight.lock().await;
        self.input
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        // Only a prompt in output read after this point ends the operation.
        self.operation
            .send_replace(Some(self.chunks.load(Ordering::SeqCst)));
        if let Err(e) = self.write_line(source).await {
            self.operation.send_replace(None);
            return Err(e);
        }
        Ok(())
    }

    /// Kill the evaluator (if owned) and close the connection. Pending
    /// evaluations fail with [`SessionError::Closed`].
    pub async fn terminate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let child = self
            .child
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::debug!(role = %self.role, session = %self.id, "Kill failed: {e}");
            }
            let _ = child.wait().await;
        }
        for task in &self.tasks {
            task.abort();
        }
        self.operation.send_replace(None);
        self.transcript.push_closed();
        tracing::info!(role = %self.role, session = %self.id, "Session terminated");
    }

    /// Write one line and return the output that precedes the next prompt.
    async fn exchange(&self, line: &str) -> Result<String, SessionError> {
        let mut pending = self.operation.subscribe();
        let _guard = self.in_flight.lock().await;
        // An interactive operation owns the REPL until its prompt returns.
        if pending.wait_for(Option::is_none).await.is_err() {
            return Err(SessionError::Closed);
        }

        let mut rx = self.transcript.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.write_line(line).await?;
        self.collect_until_prompt(&mut rx, String::new()).await
    }

    async fn collect_until_prompt(
        &self,
        rx: &mut broadcast::Receiver<TranscriptEntry>,
        mut buffer: String,
    ) -> Result<String, SessionError> {
        loop {
            match rx.recv().await {
                Ok(TranscriptEntry::Output(chunk)) => {
                    buffer.push_str(&chunk);
                    if let Some(start) = self.prompt.find_at_end(&buffer) {
                        buffer.truncate(start);
                        return Ok(buffer);
                    }
                }
                Ok(TranscriptEntry::Input(_) | TranscriptEntry::Diagnostic(_)) => {}
                Ok(TranscriptEntry::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    return Err(SessionError::Closed);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(SessionError::Lagged(n)),
            }
        }
    }

    async fn write_line(&self, text: &str) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;
        let line = format!("{text}\n");
        self.transcript.push_input(line.clone());
        tracing::debug!(role = %self.role, session = %self.id, bytes = line.len(), "Sending");
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.closed.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("port", &self.port)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(child) = self
            .child
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_mut()
        {
            let _ = child.start_kill();
        }
    }
}

struct ReadLoop {
    id: SessionId,
    role: Role,
    reader: BoxReader,
    transcript: Arc<Transcript>,
    prompt: PromptMatcher,
    closed: Arc<AtomicBool>,
    operation: watch::Sender<Option<u64>>,
    chunks: Arc<AtomicU64>,
    notifier: Arc<dyn Notifier>,
}

/// Move evaluator output into the transcript until EOF.
async fn read_loop(mut ctx: ReadLoop) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut partial = Vec::new();
    let mut tail = String::new();

    loop {
        match ctx.reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                partial.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut partial);
                if text.is_empty() {
                    continue;
                }
                tail.push_str(&text);
                let seq = ctx.chunks.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.transcript.push_output(text);

                let since = *ctx.operation.borrow();
                if since.is_some_and(|since| seq > since) && ctx.prompt.ends_with_prompt(&tail) {
                    ctx.operation.send_replace(None);
                    ctx.notifier.notify(&SessionEvent::OperationFinished {
                        role: ctx.role,
                        session: ctx.id,
                    });
                }
                trim_front(&mut tail, 512);
            }
            Err(e) => {
                tracing::error!(role = %ctx.role, session = %ctx.id, "Error reading evaluator output: {e}");
                break;
            }
        }
    }

    if !partial.is_empty() {
        ctx.transcript
            .push_output(String::from_utf8_lossy(&partial).into_owned());
    }
    ctx.closed.store(true, Ordering::SeqCst);
    ctx.operation.send_replace(None);
    ctx.transcript.push_closed();
    tracing::info!(role = %ctx.role, session = %ctx.id, "Evaluator output closed");
}

async fn forward_diagnostics(mut reader: BoxReader, transcript: Arc<Transcript>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => transcript.push(TranscriptEntry::Diagnostic(
                String::from_utf8_lossy(&buf[..n]).into_owned(),
            )),
        }
    }
}

/// Decode the longest valid UTF-8 prefix of `bytes`, keeping an incomplete
/// trailing sequence for the next chunk.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            let s = s.to_string();
            bytes.clear();
            s
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let s = String::from_utf8_lossy(&bytes[..valid]).into_owned();
            bytes.drain(..valid);
            s
        }
        Err(_) => {
            let s = String::from_utf8_lossy(bytes).into_owned();
            bytes.clear();
            s
        }
    }
}

fn trim_front(s: &mut String, keep: usize) {
    if s.len() > keep {
        let mut cut = s.len() - keep;
        while !s.is_char_boundary(cut) {
            cut += 1;
        }
        s.drain(..cut);
    }
}
