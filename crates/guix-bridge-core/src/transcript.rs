//! Retained and broadcast record of a session's traffic.

use std::{collections::VecDeque, sync::RwLock};

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Text retained per transcript; the oldest entries go first.
const RETAINED_BYTES: usize = 4 * 1024 * 1024;

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    /// Text sent to the evaluator.
    Input(String),
    /// Text received from the evaluator.
    Output(String),
    /// Secondary output, such as a spawned evaluator's stderr.
    Diagnostic(String),
    /// The evaluator's output stream ended.
    Closed,
}

impl TranscriptEntry {
    fn text_len(&self) -> usize {
        match self {
            Self::Input(s) | Self::Output(s) | Self::Diagnostic(s) => s.len(),
            Self::Closed => 0,
        }
    }
}

/// Transcript of one evaluator session.
///
/// Keeps the most recent traffic (up to a byte limit) for inspection after
/// the fact, and broadcasts every entry to live listeners.
pub struct Transcript {
    retained: RwLock<(VecDeque<TranscriptEntry>, usize)>,
    sender: broadcast::Sender<TranscriptEntry>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(10000);
        Self {
            retained: RwLock::new((VecDeque::new(), 0)),
            sender,
        }
    }

    /// Record an entry and broadcast it to live listeners.
    pub fn push(&self, entry: TranscriptEntry) {
        let _ = self.sender.send(entry.clone());

        let mut guard = self
            .retained
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (entries, bytes) = &mut *guard;
        *bytes += entry.text_len();
        entries.push_back(entry);
        while *bytes > RETAINED_BYTES && entries.len() > 1 {
            if let Some(oldest) = entries.pop_front() {
                *bytes -= oldest.text_len();
            }
        }
    }

    pub fn push_input(&self, s: impl Into<String>) {
        self.push(TranscriptEntry::Input(s.into()));
    }

    pub fn push_output(&self, s: impl Into<String>) {
        self.push(TranscriptEntry::Output(s.into()));
    }

    pub fn push_closed(&self) {
        self.push(TranscriptEntry::Closed);
    }

    /// Receiver for live entries pushed after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained entries, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TranscriptEntry> {
        self.retained
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .0
            .iter()
            .cloned()
            .collect()
    }

    /// All retained output text, concatenated.
    #[must_use]
    pub fn output_text(&self) -> String {
        self.history()
            .into_iter()
            .filter_map(|e| match e {
                TranscriptEntry::Output(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Evaluator output (standard output and diagnostics) pushed after this
    /// call, ending when the session closes. Entries lost to lag are skipped.
    #[must_use]
    pub fn live_output(&self) -> BoxStream<'static, String> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .take_while(|e| future::ready(*e != TranscriptEntry::Closed))
            .filter_map(|e| {
                future::ready(match e {
                    TranscriptEntry::Output(s) | TranscriptEntry::Diagnostic(s) => Some(s),
                    TranscriptEntry::Input(_) | TranscriptEntry::Closed => None,
                })
            })
            .boxed()
    }
}
