//! Branch Stream Adapter
//!
//! Wraps one backend call for one model and turns the backend's native token
//! stream into a uniform, lazy sequence of [`BranchEvent`]s.
//!
//! Guarantees, regardless of how the backend behaves:
//! - a failure to open the stream yields a single `Error` event
//! - every received token becomes a `Fragment`, empty text included
//! - the sequence ends with exactly one terminal event and nothing after it
//! - a backend that goes away mid-stream produces a trailing `Error`; fragments
//!   already yielded stay yielded

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ChatBackend, ChatRequest, StreamingToken};
use crate::events::{BranchEvent, BranchId, BranchState};

/// Adapter for a single branch
pub struct BranchAdapter {
    branch: BranchId,
    model: String,
    prompt: String,
    backend: Arc<dyn ChatBackend>,
    /// Fail the branch if the backend stays silent this long
    idle_timeout: Option<Duration>,
    state: BranchState,
    receiver: Option<mpsc::Receiver<StreamingToken>>,
    fragments: u32,
}

impl BranchAdapter {
    /// Create an adapter; nothing is opened until the first event is pulled
    pub fn new(
        branch: BranchId,
        model: impl Into<String>,
        prompt: impl Into<String>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            branch,
            model: model.into(),
            prompt: prompt.into(),
            backend,
            idle_timeout: None,
            state: BranchState::Pending,
            receiver: None,
            fragments: 0,
        }
    }

    /// Set the idle timeout between backend tokens
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> BranchState {
        self.state
    }

    /// Number of fragments yielded so far
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        self.fragments
    }

    /// Pull the next event
    ///
    /// Returns `None` once the terminal event has been yielded.
    pub async fn next_event(&mut self) -> Option<BranchEvent> {
        match self.state {
            BranchState::Done | BranchState::Failed => return None,
            BranchState::Pending => {
                let request = ChatRequest::new(self.model.clone(), self.prompt.clone());
                let opened = match self.idle_timeout {
                    Some(limit) => {
                        match tokio::time::timeout(limit, self.backend.open_stream(&request)).await
                        {
                            Ok(opened) => opened,
                            Err(_) => return Some(self.fail(silence_message(limit))),
                        }
                    }
                    None => self.backend.open_stream(&request).await,
                };
                match opened {
                    Ok(receiver) => {
                        debug!(branch = %self.branch, model = %self.model, "Branch stream opened");
                        self.receiver = Some(receiver);
                        self.state = BranchState::Streaming;
                    }
                    Err(e) => return Some(self.fail(format!("{e:#}"))),
                }
            }
            BranchState::Streaming => {}
        }

        let Some(receiver) = self.receiver.as_mut() else {
            return Some(self.fail("branch stream is not open"));
        };

        let next = match self.idle_timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, receiver.recv()).await;
                match waited {
                    Ok(next) => next,
                    Err(_) => return Some(self.fail(silence_message(limit))),
                }
            }
            None => receiver.recv().await,
        };

        Some(match next {
            Some(StreamingToken::Token(text)) => {
                self.fragments += 1;
                BranchEvent::fragment(self.branch, self.model.clone(), text)
            }
            Some(StreamingToken::Complete) => {
                self.close(BranchState::Done);
                debug!(
                    branch = %self.branch,
                    model = %self.model,
                    fragments = self.fragments,
                    "Branch completed"
                );
                BranchEvent::done(self.branch, self.model.clone())
            }
            Some(StreamingToken::Error(message)) => self.fail(message),
            None => self.fail("backend stream closed before completion"),
        })
    }

    /// Convert into a lazy stream of events
    pub fn into_stream(self) -> impl Stream<Item = BranchEvent> + Send + 'static {
        futures::stream::unfold(self, |mut adapter| async move {
            adapter
                .next_event()
                .await
                .map(|event| (event, adapter))
        })
    }

    fn close(&mut self, state: BranchState) {
        self.state = state;
        // Releases the backend connection
        self.receiver = None;
    }

    fn fail(&mut self, message: impl Into<String>) -> BranchEvent {
        let message = message.into();
        warn!(
            branch = %self.branch,
            model = %self.model,
            fragments = self.fragments,
            error = %message,
            "Branch failed"
        );
        self.close(BranchState::Failed);
        BranchEvent::error(self.branch, self.model.clone(), message)
    }
}

fn silence_message(limit: Duration) -> String {
    format!("no output from model within {}s", limit.as_secs_f32())
}
