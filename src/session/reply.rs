//! Streamed replies

use super::chat::SessionInner;
use super::{PartialReplyPolicy, SessionState};
use crate::api::{SseDecoder, StreamEvent};
use crate::conversation::{Message, Role};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lazy sequence of reply fragments.
///
/// Yields each content fragment as it arrives. The full reply is stored once
/// the stream ends. Cancelling, or dropping the stream before it ends, applies
/// the session's partial reply policy and moves the session to `Cancelled`.
pub struct ReplyStream {
    inner: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
    cancel: CancellationToken,
}

impl ReplyStream {
    pub(super) fn new(response: reqwest::Response, turn: Turn, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let inner = async_stream::stream! {
            let mut turn = turn;
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            'read: loop {
                let step = tokio::select! {
                    biased;
                    _ = token.cancelled() => Step::Cancelled,
                    chunk = body.next() => match chunk {
                        Some(Ok(bytes)) => Step::Bytes(bytes),
                        Some(Err(e)) => Step::Failed(e.to_string()),
                        None => Step::Eof,
                    },
                };

                match step {
                    Step::Bytes(bytes) => {
                        for event in decoder.push(&bytes) {
                            match turn.accept(event) {
                                Accepted::Fragment(fragment) => yield Ok(fragment),
                                Accepted::Done => {
                                    turn.complete();
                                    break 'read;
                                }
                                Accepted::Nothing => {}
                            }
                        }
                    }
                    Step::Eof => {
                        if let Some(event) = decoder.finish() {
                            if let Accepted::Fragment(fragment) = turn.accept(event) {
                                yield Ok(fragment);
                            }
                        }
                        turn.complete();
                        break 'read;
                    }
                    Step::Failed(reason) => {
                        warn!("Reply stream interrupted: {}", reason);
                        turn.fail();
                        yield Err(ChatError::Stream(reason));
                        break 'read;
                    }
                    Step::Cancelled => {
                        turn.cancel();
                        yield Err(ChatError::Cancelled);
                        break 'read;
                    }
                }
            }
        };

        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// Stop the reply. The next poll yields `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this reply, e.g. from a signal handler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ReplyStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum Step {
    Bytes(Bytes),
    Eof,
    Failed(String),
    Cancelled,
}

enum Accepted {
    Fragment(String),
    Done,
    Nothing,
}

/// One in-flight request. Settles the session state exactly once, on drop
/// at the latest.
pub(super) struct Turn {
    session: Arc<SessionInner>,
    conversation_id: Option<String>,
    policy: PartialReplyPolicy,
    role: Option<Role>,
    content: String,
    settled: bool,
}

impl Turn {
    pub(super) fn new(
        session: Arc<SessionInner>,
        conversation_id: Option<String>,
        policy: PartialReplyPolicy,
    ) -> Self {
        Self {
            session,
            conversation_id,
            policy,
            role: None,
            content: String::new(),
            settled: false,
        }
    }

    pub(super) fn set_state(&self, state: SessionState) {
        self.session.core().state = state;
    }

    fn accept(&mut self, event: StreamEvent) -> Accepted {
        let chunk = match event {
            StreamEvent::Done => return Accepted::Done,
            StreamEvent::Chunk(chunk) => chunk,
        };
        let Some(delta) = chunk.first_delta() else {
            return Accepted::Nothing;
        };

        if self.role.is_none() {
            if let Some(role) = &delta.role {
                self.role = Some(role.parse().unwrap_or_else(|_| {
                    debug!("Unrecognized reply role '{}', using assistant", role);
                    Role::Assistant
                }));
            }
        }

        match &delta.content {
            Some(content) if !content.is_empty() => {
                METRICS.stream_fragments.inc();
                self.content.push_str(content);
                Accepted::Fragment(content.clone())
            }
            _ => Accepted::Nothing,
        }
    }

    fn reply(&mut self) -> Message {
        Message::new(
            self.role.unwrap_or(Role::Assistant),
            std::mem::take(&mut self.content),
        )
    }

    /// Store the full reply and enter `Completed`
    pub(super) fn complete(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;

        let reply = self.reply();
        let mut core = self.session.core();
        if let Some(id) = &self.conversation_id {
            if let Err(e) = core.store.append(id, reply) {
                warn!("Reply could not be stored: {}", e);
            }
        }
        core.state = SessionState::Completed;
        info!("Reply completed");
    }

    pub(super) fn fail(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.set_state(SessionState::Failed);
    }

    /// Apply the partial reply policy and enter `Cancelled`
    pub(super) fn cancel(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        METRICS.cancelled_replies.inc();

        let keep = self.policy == PartialReplyPolicy::KeepIncomplete && !self.content.is_empty();
        warn!(
            "Reply cancelled after {} bytes, partial text {}",
            self.content.len(),
            if keep { "kept" } else { "discarded" }
        );

        let partial = self.reply().mark_incomplete();
        let mut core = self.session.core();
        if let (true, Some(id)) = (keep, &self.conversation_id) {
            if let Err(e) = core.store.append(id, partial) {
                warn!("Partial reply could not be stored: {}", e);
            }
        }
        core.state = SessionState::Cancelled;
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if !self.settled {
            self.cancel();
        }
    }
}
