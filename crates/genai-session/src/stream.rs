use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::content::Message;
use crate::errors::{ProviderError, SessionError};
use crate::provider::{ProviderEvent, ProviderEventStream};
use crate::transcript::Transcript;

/// Handle used to cancel an in-flight stream from elsewhere.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The stream yields `Err(SessionError::Cancelled)` at its next pull and
    /// never commits a model message.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Text buffer for one streaming call.
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    text: String,
    chunks: usize,
}

impl StreamAccumulator {
    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        self.chunks += 1;
    }
}

/// Result of a completed streaming call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    pub call_id: uuid::Uuid,
    /// Ordered concatenation of every yielded chunk.
    pub text: String,
    /// The model-authored message built from `text`.
    pub message: Message,
    pub finish_reason: Option<String>,
    pub chunk_count: usize,
}

enum CursorState {
    Open,
    Finished(StreamOutcome),
    Failed(SessionError),
}

enum Step {
    Aborted,
    TimedOut,
    Event(Option<Result<ProviderEvent, ProviderError>>),
}

/// Pull-based, single-pass cursor over the chunks of one remote call.
///
/// Chunks are handed out in the order the transport delivered them and are
/// accumulated at the same time. When the remote stream ends the cursor
/// builds one model message from the accumulated text and, for chat calls,
/// appends it to the session history. A failure, an abort or dropping the
/// cursor early discards the accumulated text instead.
#[must_use = "a response stream does nothing until it is pulled"]
pub struct ResponseStream<'s> {
    call_id: uuid::Uuid,
    session_id: uuid::Uuid,
    inner: ProviderEventStream,
    accumulator: StreamAccumulator,
    history: Option<&'s mut Transcript>,
    deadline: Option<Instant>,
    abort_tx: watch::Sender<bool>,
    abort_rx: watch::Receiver<bool>,
    finish_reason: Option<String>,
    state: CursorState,
}

impl<'s> ResponseStream<'s> {
    pub(crate) fn new(
        call_id: uuid::Uuid,
        session_id: uuid::Uuid,
        inner: ProviderEventStream,
        history: Option<&'s mut Transcript>,
        deadline: Option<Instant>,
    ) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        Self {
            call_id,
            session_id,
            inner,
            accumulator: StreamAccumulator::default(),
            history,
            deadline,
            abort_tx,
            abort_rx,
            finish_reason: None,
            state: CursorState::Open,
        }
    }

    pub fn call_id(&self) -> uuid::Uuid {
        self.call_id
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Whether a completed response will be committed to the session history.
    pub fn is_chat(&self) -> bool {
        self.history.is_some()
    }

    /// Text accumulated so far.
    pub fn text_so_far(&self) -> &str {
        &self.accumulator.text
    }

    /// Returns a handle that can cancel this call.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    /// Pulls the next text chunk.
    ///
    /// Non-empty deltas are yielded unmodified in arrival order; empty deltas
    /// are skipped, so the yielded chunks still concatenate to the final text.
    /// Returns `None` once the stream has been finalized or has failed. A
    /// failure is reported exactly once as `Some(Err(..))`.
    pub async fn next_chunk(&mut self) -> Option<Result<String, SessionError>> {
        if !matches!(self.state, CursorState::Open) {
            return None;
        }
        loop {
            let step = tokio::select! {
                biased;
                _ = aborted(&mut self.abort_rx) => Step::Aborted,
                _ = deadline_elapsed(self.deadline) => Step::TimedOut,
                next = self.inner.next() => Step::Event(next),
            };
            match step {
                Step::Aborted => return Some(Err(self.fail(SessionError::Cancelled))),
                Step::TimedOut => {
                    return Some(Err(self.fail(SessionError::Transport(
                        "call deadline elapsed before the stream completed".into(),
                    ))));
                }
                Step::Event(Some(Ok(ProviderEvent::TextDelta { text }))) => {
                    if text.is_empty() {
                        continue;
                    }
                    debug!(call_id = %self.call_id, seq = self.accumulator.chunks, len = text.len(), "stream chunk");
                    self.accumulator.push(&text);
                    return Some(Ok(text));
                }
                Step::Event(Some(Ok(ProviderEvent::Completed { finish_reason }))) => {
                    self.finish_reason = finish_reason;
                    self.finalize();
                    return None;
                }
                Step::Event(Some(Err(err))) => return Some(Err(self.fail(err.into()))),
                Step::Event(None) => {
                    self.finalize();
                    return None;
                }
            }
        }
    }

    /// Drains the remaining chunks and returns the finalized response.
    ///
    /// Safe to call after consuming some or all chunks with `next_chunk()`;
    /// a failure already reported by `next_chunk()` is returned again.
    pub async fn finish(mut self) -> Result<StreamOutcome, SessionError> {
        while let Some(chunk) = self.next_chunk().await {
            chunk?;
        }
        match std::mem::replace(&mut self.state, CursorState::Open) {
            CursorState::Finished(outcome) => {
                self.state = CursorState::Finished(outcome.clone());
                Ok(outcome)
            }
            CursorState::Failed(err) => {
                self.state = CursorState::Failed(err.clone());
                Err(err)
            }
            CursorState::Open => Err(SessionError::Protocol(
                "response stream ended without a terminal state".into(),
            )),
        }
    }

    fn finalize(&mut self) {
        let accumulator = std::mem::take(&mut self.accumulator);
        let message = Message::model_text(accumulator.text.clone());
        if let Some(history) = self.history.as_mut() {
            history.append(message.clone());
        }
        info!(
            call_id = %self.call_id,
            session_id = %self.session_id,
            chunks = accumulator.chunks,
            len = accumulator.text.len(),
            committed = self.history.is_some(),
            finish_reason = ?self.finish_reason,
            "stream finalized"
        );
        self.state = CursorState::Finished(StreamOutcome {
            call_id: self.call_id,
            text: accumulator.text,
            message,
            finish_reason: self.finish_reason.take(),
            chunk_count: accumulator.chunks,
        });
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(
            call_id = %self.call_id,
            session_id = %self.session_id,
            discarded_len = self.accumulator.text.len(),
            error = %err,
            "stream failed; partial output discarded"
        );
        self.accumulator = StreamAccumulator::default();
        self.state = CursorState::Failed(err.clone());
        err
    }
}

impl Drop for ResponseStream<'_> {
    fn drop(&mut self) {
        if matches!(self.state, CursorState::Open) {
            debug!(call_id = %self.call_id, "response stream dropped before completion");
        }
    }
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn events(items: Vec<Result<ProviderEvent, ProviderError>>) -> ProviderEventStream {
        Box::pin(stream::iter(items))
    }

    fn delta(text: &str) -> Result<ProviderEvent, ProviderError> {
        Ok(ProviderEvent::TextDelta { text: text.into() })
    }

    #[tokio::test]
    async fn chunks_concatenate_into_outcome_in_order() {
        let mut transcript = Transcript::new();
        let mut stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            events(vec![delta("a"), delta(""), delta("b"), delta("c")]),
            Some(&mut transcript),
            None,
        );

        let mut seen = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            seen.push(chunk.expect("chunk"));
        }
        let outcome = stream.finish().await.expect("finish");
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(outcome.text, seen.concat());
        assert_eq!(outcome.chunk_count, 3);
        assert_eq!(transcript.all(), &[Message::model_text("abc")]);
    }

    #[tokio::test]
    async fn completion_event_carries_finish_reason() {
        let stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            events(vec![
                delta("done"),
                Ok(ProviderEvent::Completed {
                    finish_reason: Some("STOP".into()),
                }),
                delta("ignored after completion"),
            ]),
            None,
            None,
        );
        let outcome = stream.finish().await.expect("finish");
        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn failure_is_reported_once_and_discards_text() {
        let mut transcript = Transcript::new();
        let mut stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            events(vec![
                delta("partial"),
                Err(ProviderError::transport("fake", "connection reset")),
            ]),
            Some(&mut transcript),
            None,
        );
        assert_eq!(
            stream.next_chunk().await,
            Some(Ok("partial".to_string()))
        );
        assert!(matches!(
            stream.next_chunk().await,
            Some(Err(SessionError::Transport(_)))
        ));
        assert_eq!(stream.next_chunk().await, None);
        assert_eq!(stream.text_so_far(), "");
        assert!(matches!(
            stream.finish().await,
            Err(SessionError::Transport(_))
        ));
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn abort_stops_pending_stream_without_commit() {
        let mut transcript = Transcript::new();
        let mut stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            Box::pin(stream::iter(vec![delta("first")]).chain(stream::pending())),
            Some(&mut transcript),
            None,
        );
        assert_eq!(stream.next_chunk().await, Some(Ok("first".to_string())));

        let abort = stream.abort_handle();
        abort.abort();
        assert_eq!(stream.next_chunk().await, Some(Err(SessionError::Cancelled)));
        assert_eq!(stream.next_chunk().await, None);
        drop(stream);
        assert!(transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_from_another_task_wakes_waiting_pull() {
        let mut transcript = Transcript::new();
        let mut stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            Box::pin(stream::iter(vec![delta("first")]).chain(stream::pending())),
            Some(&mut transcript),
            None,
        );
        assert_eq!(stream.next_chunk().await, Some(Ok("first".to_string())));

        let abort = stream.abort_handle();
        let aborter = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            abort.abort();
        });
        assert_eq!(stream.next_chunk().await, Some(Err(SessionError::Cancelled)));
        aborter.await.expect("aborter");
        assert_eq!(stream.text_so_far(), "");
        drop(stream);
        assert!(transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_stalled_stream_into_transport_error() {
        let stream = ResponseStream::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            Box::pin(stream::pending()),
            None,
            Some(Instant::now() + std::time::Duration::from_secs(5)),
        );
        let err = stream.finish().await.expect_err("deadline");
        assert!(matches!(err, SessionError::Transport(msg) if msg.contains("deadline")));
    }
}
