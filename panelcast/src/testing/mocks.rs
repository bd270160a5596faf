//! Scripted inference client and in-memory archive reader.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::fixtures;
use crate::archive::{ArchiveContents, ArchiveError, ArchiveReader, SamplingPolicy};
use crate::core::{SourceRef, StageName};
use crate::inference::{InferenceClient, InferenceError, InferenceRequest, InferenceResponse};

/// One scripted reaction to an inference call.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Reply with this text.
    Reply(String),
    /// Reply with this text after a delay.
    Delayed(Duration, String),
    /// Fail with this error.
    Fail(InferenceError),
    /// Never answer.
    Hang,
}

/// Inference client that plays back per-stage scripts.
///
/// Each stage has a queue of reactions. When a queue runs dry the stage's
/// fallback is used, and a stage without one fails with an upstream error.
#[derive(Debug, Default)]
pub struct ScriptedInferenceClient {
    queues: Mutex<HashMap<StageName, VecDeque<Scripted>>>,
    fallbacks: Mutex<HashMap<StageName, Scripted>>,
    requests: Mutex<Vec<InferenceRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedInferenceClient {
    /// A client with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose fallbacks are well-formed replies for every stage.
    #[must_use]
    pub fn happy_path() -> Self {
        Self::new()
            .with_fallback(StageName::Extract, Scripted::Reply(fixtures::extract_response(4, 220)))
            .with_fallback(StageName::Review, Scripted::Reply(fixtures::review_response(220)))
            .with_fallback(StageName::Integrate, Scripted::Reply(fixtures::integrate_response(220)))
    }

    /// Sets the reaction used once a stage's queue is empty.
    #[must_use]
    pub fn with_fallback(self, stage: StageName, reaction: Scripted) -> Self {
        self.fallbacks.lock().insert(stage, reaction);
        self
    }

    /// Queues reactions for a stage.
    #[must_use]
    pub fn with_script(self, stage: StageName, reactions: Vec<Scripted>) -> Self {
        self.push(stage, reactions);
        self
    }

    /// Appends reactions for a stage.
    pub fn push(&self, stage: StageName, reactions: Vec<Scripted>) {
        self.queues
            .lock()
            .entry(stage)
            .or_default()
            .extend(reactions);
    }

    /// Calls received for a stage.
    #[must_use]
    pub fn calls(&self, stage: StageName) -> usize {
        self.requests.lock().iter().filter(|r| r.stage == stage).count()
    }

    /// Calls received in total.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of calls that were in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next(&self, stage: StageName) -> Option<Scripted> {
        if let Some(reaction) = self.queues.lock().get_mut(&stage).and_then(VecDeque::pop_front) {
            return Some(reaction);
        }
        self.fallbacks.lock().get(&stage).cloned()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceClient for ScriptedInferenceClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.next(request.stage) {
            Some(Scripted::Reply(text)) => Ok(InferenceResponse::text(text)),
            Some(Scripted::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(InferenceResponse::text(text))
            }
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(InferenceError::Upstream(format!(
                "no scripted reply for stage '{}'",
                request.stage
            ))),
        }
    }
}

/// Archive reader that serves fixed contents without touching disk.
#[derive(Debug)]
pub struct StaticArchiveReader {
    total_pages: usize,
    missing: bool,
    reads: AtomicUsize,
}

impl StaticArchiveReader {
    /// Serves an archive of `total_pages` synthetic pages.
    #[must_use]
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            missing: false,
            reads: AtomicUsize::new(0),
        }
    }

    /// Reports every archive as missing.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            total_pages: 0,
            missing: true,
            reads: AtomicUsize::new(0),
        }
    }

    /// Reads served so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveReader for StaticArchiveReader {
    async fn read(
        &self,
        source: &SourceRef,
        policy: &SamplingPolicy,
    ) -> Result<ArchiveContents, ArchiveError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            return Err(ArchiveError::NotFound(source.to_string()));
        }
        let mut contents = fixtures::archive_contents(self.total_pages, policy.max_pages);
        contents.source = source.clone();
        Ok(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ResponseShape;

    fn request(stage: StageName) -> InferenceRequest {
        InferenceRequest::new(
            stage,
            "sys",
            "prompt",
            ResponseShape {
                name: "probe".into(),
                example: serde_json::json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let client = ScriptedInferenceClient::new()
            .with_script(
                StageName::Review,
                vec![Scripted::Fail(InferenceError::Upstream("502".into()))],
            )
            .with_fallback(StageName::Review, Scripted::Reply("{}".into()));

        assert!(client.infer(&request(StageName::Review)).await.is_err());
        assert_eq!(client.infer(&request(StageName::Review)).await.unwrap().text, "{}");
        assert!(client.infer(&request(StageName::Extract)).await.is_err());
        assert_eq!(client.calls(StageName::Review), 2);
        assert_eq!(client.total_calls(), 3);
        assert_eq!(client.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_static_reader() {
        let reader = StaticArchiveReader::new(10);
        let contents = reader
            .read(&SourceRef::new("a.cbz"), &SamplingPolicy::new(3))
            .await
            .unwrap();
        assert_eq!(contents.total_pages, 10);
        assert_eq!(contents.sampled_pages(), 3);
        assert_eq!(reader.reads(), 1);

        let missing = StaticArchiveReader::missing();
        assert!(matches!(
            missing.read(&SourceRef::new("a.cbz"), &SamplingPolicy::default()).await,
            Err(ArchiveError::NotFound(_))
        ));
    }
}
