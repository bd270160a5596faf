//! Resolves one stage into a persisted artifact.
//!
//! The runner owns every retry decision below the pipeline level:
//! transient upstream errors are retried with backoff, a response that
//! fails validation gets one corrective follow-up, and everything else
//! resolves the stage immediately. Whatever happens, the stage ends with
//! exactly one new artifact in the store.

use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn, Instrument};

use super::spec::StageSpec;
use crate::cancellation::CancellationToken;
use crate::contracts::StagePayload;
use crate::core::{ErrorKind, StageArtifact};
use crate::events::{EventKind, EventSink, PipelineEvent};
use crate::inference::{
    AdmissionGate, InferenceClient, InferenceError, InferenceRequest, InferenceResponse,
};
use crate::stages::{StageContext, StageDefinition};
use crate::store::{ArtifactStore, StoreError};
use crate::utils::{duration_ms, elapsed_ms};

/// How a stage ended before persistence.
enum Resolution {
    Resolved {
        payload: StagePayload,
        aspects: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl Resolution {
    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Runs stage definitions against the shared client, gate and store.
#[derive(Clone)]
pub struct StageRunner {
    client: Arc<dyn InferenceClient>,
    gate: Arc<AdmissionGate>,
    store: Arc<dyn ArtifactStore>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("gate", &self.gate.config())
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        client: Arc<dyn InferenceClient>,
        gate: Arc<AdmissionGate>,
        store: Arc<dyn ArtifactStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            gate,
            store,
            sink,
        }
    }

    /// The artifact store this runner persists into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// The event sink this runner reports to.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Resolves a stage and persists the resulting artifact.
    ///
    /// Stage failures come back as a `failed` artifact; only store errors
    /// are returned as `Err`.
    pub async fn execute(
        &self,
        spec: &StageSpec,
        definition: &dyn StageDefinition,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<StageArtifact, StoreError> {
        let span = tracing::info_span!("stage", run_id = %ctx.run_id, stage = %spec.name);
        self.execute_inner(spec, definition, ctx, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        spec: &StageSpec,
        definition: &dyn StageDefinition,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<StageArtifact, StoreError> {
        let started = Instant::now();
        self.sink
            .emit(
                PipelineEvent::stage(EventKind::StageStarted, ctx.run_id, spec.name).with_data(
                    json!({
                        "max_retries": spec.max_retries,
                        "call_timeout_ms": duration_ms(spec.call_timeout),
                        "stage_deadline_ms": duration_ms(spec.stage_deadline),
                    }),
                ),
            )
            .await;

        let mut attempts = 0;
        let (fingerprint, resolution) = match definition.input_fingerprint(ctx) {
            Ok(fingerprint) => {
                let resolution = self
                    .resolve(spec, definition, ctx, cancel, started, &mut attempts)
                    .await;
                (fingerprint, resolution)
            }
            Err(violation) => (
                String::new(),
                Resolution::failed(ErrorKind::ContractViolation, violation.to_string()),
            ),
        };

        let artifact = match resolution {
            Resolution::Resolved { payload, aspects } => {
                StageArtifact::resolved(ctx.run_id, payload, aspects)
            }
            Resolution::Failed { kind, message } => {
                StageArtifact::failed(ctx.run_id, spec.name, kind, message)
            }
        };
        let version = self.store.latest_version(ctx.run_id, spec.name).await? + 1;
        let artifact = artifact
            .with_version(version)
            .with_fingerprint(fingerprint)
            .with_timing(attempts, elapsed_ms(started));
        self.store.put(&artifact).await?;

        match &artifact.error {
            None => info!(version, attempts, "stage resolved ok"),
            Some(detail) => warn!(
                version,
                attempts,
                status = ?artifact.status,
                kind = detail.kind.as_str(),
                message = %detail.message,
                "stage resolved with problems"
            ),
        }
        self.sink
            .emit(
                PipelineEvent::stage(EventKind::StageResolved, ctx.run_id, spec.name).with_data(
                    json!({
                        "version": artifact.version,
                        "status": artifact.status,
                        "attempts": artifact.attempts,
                        "elapsed_ms": artifact.elapsed_ms,
                        "error_kind": artifact.error_kind().map(ErrorKind::as_str),
                    }),
                ),
            )
            .await;
        Ok(artifact)
    }

    async fn resolve(
        &self,
        spec: &StageSpec,
        definition: &dyn StageDefinition,
        ctx: &StageContext,
        cancel: &CancellationToken,
        started: Instant,
        attempts: &mut u32,
    ) -> Resolution {
        let original = match definition.build_request(ctx) {
            Ok(request) => request,
            Err(violation) => {
                return Resolution::failed(ErrorKind::ContractViolation, violation.to_string())
            }
        };
        let deadline = started + spec.stage_deadline;
        let mut request = original.clone();
        let mut retries = 0;
        let mut corrected = false;

        loop {
            if cancel.is_cancelled() {
                return cancelled(cancel);
            }
            if Instant::now() >= deadline {
                return deadline_exceeded(spec, *attempts);
            }
            *attempts += 1;
            let attempt = *attempts;
            debug!(attempt, "calling inference");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(cancel),
                result = self.call(spec, &request, deadline) => result,
            };

            let error = match result {
                Ok(response) => match definition.parse_response(ctx, &response) {
                    Ok(payload) => {
                        let aspects = definition.assess(ctx, &payload);
                        return Resolution::Resolved { payload, aspects };
                    }
                    Err(malformed) if !corrected => {
                        corrected = true;
                        self.attempt_failed(ctx, spec, attempt, "malformed_response", &malformed)
                            .await;
                        request =
                            definition.corrective_request(&original, &response.text, &malformed);
                        continue;
                    }
                    Err(malformed) => {
                        return Resolution::failed(
                            ErrorKind::MalformedResponse,
                            format!("response rejected after corrective retry: {malformed}"),
                        );
                    }
                },
                Err(error) => error,
            };

            if !error.is_transient() {
                return Resolution::failed(ErrorKind::RequestRejected, error.to_string());
            }
            self.attempt_failed(ctx, spec, attempt, "transient", &error).await;
            if retries >= spec.max_retries {
                return Resolution::failed(
                    ErrorKind::TransientUpstream,
                    format!("{error} (gave up after {attempt} attempts)"),
                );
            }
            let delay = spec.backoff.delay_for(retries, error.retry_after());
            retries += 1;
            if Instant::now() + delay >= deadline {
                return deadline_exceeded(spec, attempt);
            }
            debug!(delay_ms = duration_ms(delay), retry = retries, "backing off");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(cancel),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One call through the gate, bounded by the call timeout and the
    /// remaining stage deadline.
    async fn call(
        &self,
        spec: &StageSpec,
        request: &InferenceRequest,
        deadline: Instant,
    ) -> Result<InferenceResponse, InferenceError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(_permit) = timeout(remaining, self.gate.admit()).await else {
            return Err(InferenceError::Timeout(remaining));
        };
        let budget = spec.call_budget(deadline.saturating_duration_since(Instant::now()));
        match timeout(budget, self.client.infer(request)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(budget)),
        }
    }

    async fn attempt_failed(
        &self,
        ctx: &StageContext,
        spec: &StageSpec,
        attempt: u32,
        reason: &str,
        error: &(dyn std::fmt::Display + Sync),
    ) {
        warn!(attempt, reason, error = %error, "inference attempt failed");
        self.sink
            .emit(
                PipelineEvent::stage(EventKind::StageAttemptFailed, ctx.run_id, spec.name)
                    .with_data(json!({
                        "attempt": attempt,
                        "reason": reason,
                        "error": error.to_string(),
                    })),
            )
            .await;
    }
}

fn cancelled(cancel: &CancellationToken) -> Resolution {
    Resolution::failed(
        ErrorKind::Cancelled,
        cancel
            .reason()
            .unwrap_or_else(|| "run cancelled".to_string()),
    )
}

fn deadline_exceeded(spec: &StageSpec, attempts: u32) -> Resolution {
    Resolution::failed(
        ErrorKind::TransientUpstream,
        format!(
            "stage deadline of {}s exceeded after {attempts} attempts",
            spec.stage_deadline.as_secs()
        ),
    )
}
