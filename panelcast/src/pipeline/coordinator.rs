//! Drives runs through extract, review and integrate.
//!
//! The coordinator owns the run record. It resolves each stage through a
//! [`StageRunner`] or reuses a stored artifact whose inputs still match,
//! stops at the first failed stage and writes the run record and report
//! back to the store after every drive. The archive is only read when the
//! extract stage has to execute; its content key is kept on the run record.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::runner::StageRunner;
use crate::archive::ArchiveReader;
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::core::{
    ErrorKind, PipelineRun, RunFailure, RunId, RunStatus, SourceRef, StageArtifact, StageName,
    StageOutcome,
};
use crate::corpus::ReferenceCorpus;
use crate::errors::{PanelcastError, Result, StageBusyError};
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::inference::{AdmissionGate, InferenceClient};
use crate::report::render_report;
use crate::stages::{definition_for, StageContext};
use crate::store::ArtifactStore;

type Registry = DashMap<(RunId, StageName), ()>;

/// Releases an in-flight claim on drop.
struct InFlight {
    registry: Arc<Registry>,
    key: (RunId, StageName),
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

/// Sequences the three stages for any number of runs.
pub struct PipelineCoordinator {
    client: Arc<dyn InferenceClient>,
    store: Arc<dyn ArtifactStore>,
    reader: Arc<dyn ArchiveReader>,
    gate: Arc<AdmissionGate>,
    sink: Arc<dyn EventSink>,
    corpus: Arc<ReferenceCorpus>,
    config: PipelineConfig,
    in_flight: Arc<Registry>,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("config", &self.config)
            .field("corpus_size", &self.corpus.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl PipelineCoordinator {
    /// Creates a coordinator with default configuration, an empty corpus
    /// and no event sink.
    #[must_use]
    pub fn new(
        client: Arc<dyn InferenceClient>,
        store: Arc<dyn ArtifactStore>,
        reader: Arc<dyn ArchiveReader>,
    ) -> Self {
        let config = PipelineConfig::default();
        Self {
            client,
            store,
            reader,
            gate: Arc::new(AdmissionGate::new(config.gate)),
            sink: Arc::new(NoOpEventSink),
            corpus: Arc::new(ReferenceCorpus::empty()),
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Applies a configuration; the gate is rebuilt from its limits.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.gate = Arc::new(AdmissionGate::new(config.gate));
        self.config = config;
        self
    }

    /// Shares an existing gate, e.g. with another coordinator.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<AdmissionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the reference corpus used by the review stage.
    #[must_use]
    pub fn with_corpus(mut self, corpus: Arc<ReferenceCorpus>) -> Self {
        self.corpus = corpus;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    fn runner(&self) -> StageRunner {
        StageRunner::new(
            self.client.clone(),
            self.gate.clone(),
            self.store.clone(),
            self.sink.clone(),
        )
    }

    fn claim(&self, run_id: RunId, stage: StageName) -> Result<InFlight> {
        let key = (run_id, stage);
        match self.in_flight.entry(key) {
            Entry::Occupied(_) => Err(StageBusyError::new(run_id, stage).into()),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    registry: self.in_flight.clone(),
                    key,
                })
            }
        }
    }

    fn base_context(&self, run: &PipelineRun) -> StageContext {
        StageContext::new(run.run_id, run.source.clone(), run.target_duration_secs)
            .with_timing(self.config.timing)
            .with_sampling(self.config.sampling)
            .with_corpus(self.corpus.clone())
            .with_pages_key(run.pages_key.clone())
    }

    /// True when the stored extraction was made from the pages recorded on
    /// the run, so the archive need not be read again.
    async fn extraction_reusable(&self, run_id: RunId, ctx: &StageContext) -> Result<bool> {
        let Ok(fingerprint) = definition_for(StageName::Extract).input_fingerprint(ctx) else {
            return Ok(false);
        };
        Ok(self
            .store
            .get(run_id, StageName::Extract)
            .await?
            .is_some_and(|stored| stored.matches_inputs(&fingerprint)))
    }

    /// Attaches freshly read pages unless the stored extraction can be
    /// reused. A read failure fails the run and yields `None`.
    async fn attach_pages(
        &self,
        run: &mut PipelineRun,
        ctx: StageContext,
    ) -> Result<Option<StageContext>> {
        if self.extraction_reusable(run.run_id, &ctx).await? {
            debug!("stored extraction matches recorded pages, archive not read");
            return Ok(Some(ctx));
        }
        match self.reader.read(&run.source, &self.config.sampling).await {
            Ok(pages) => {
                run.pages_key = Some(pages.content_key());
                Ok(Some(ctx.with_pages(Arc::new(pages))))
            }
            Err(e) => {
                warn!(error = %e, "archive unavailable");
                run.fail(RunFailure::new(None, ErrorKind::InputUnavailable, e.to_string()));
                Ok(None)
            }
        }
    }

    /// Creates and persists a pending run without executing it.
    pub async fn start(&self, source: SourceRef, target_duration_secs: u32) -> Result<PipelineRun> {
        let run = PipelineRun::new(source, target_duration_secs);
        self.store.save_run(&run).await?;
        info!(run_id = %run.run_id, source = %run.source, "run created");
        Ok(run)
    }

    /// Runs all three stages against an archive.
    pub async fn run(&self, source: SourceRef, target_duration_secs: u32) -> Result<PipelineRun> {
        self.run_with_cancel(source, target_duration_secs, &CancellationToken::new())
            .await
    }

    /// Runs all three stages, stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        source: SourceRef,
        target_duration_secs: u32,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let run = self.start(source, target_duration_secs).await?;
        self.drive(run, cancel).await
    }

    /// Runs several archives concurrently, one run each.
    pub async fn run_many(
        &self,
        jobs: Vec<(SourceRef, u32)>,
        cancel: &CancellationToken,
    ) -> Vec<Result<PipelineRun>> {
        join_all(
            jobs.into_iter()
                .map(|(source, target)| self.run_with_cancel(source, target, cancel)),
        )
        .await
    }

    /// Re-drives a stored run, reusing every artifact whose inputs still match.
    pub async fn resume(&self, run_id: RunId) -> Result<PipelineRun> {
        self.resume_with_cancel(run_id, &CancellationToken::new())
            .await
    }

    /// Like [`resume`](Self::resume) with a cancellation token.
    pub async fn resume_with_cancel(
        &self,
        run_id: RunId,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let run = self.load_run(run_id).await?;
        self.drive(run, cancel).await
    }

    /// Advances a stored run through exactly one stage.
    ///
    /// Review and integrate require a usable artifact from their
    /// predecessor; extract reads the archive unless its stored artifact
    /// still matches.
    pub async fn run_stage(
        &self,
        run_id: RunId,
        stage: StageName,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let run = self.load_run(run_id).await?;
        let _claim = self.claim(run_id, stage)?;
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_stage_inner(run, stage, cancel)
            .instrument(span)
            .await
    }

    async fn run_stage_inner(
        &self,
        mut run: PipelineRun,
        stage: StageName,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let mut ctx = self.base_context(&run);
        if stage == StageName::Extract {
            run.reopen();
            ctx = match self.attach_pages(&mut run, ctx).await? {
                Some(ctx) => ctx,
                None => {
                    self.finish(&mut run, cancel).await?;
                    return Ok(run);
                }
            };
        }
        for earlier in StageName::ALL.into_iter().take(stage.index()) {
            match self.store.get(run.run_id, earlier).await? {
                Some(artifact) if artifact.is_usable() => ctx = ctx.with_upstream(artifact),
                _ if Some(earlier) == stage.predecessor() => {
                    return Err(PanelcastError::PredecessorUnresolved {
                        stage,
                        predecessor: earlier,
                    });
                }
                _ => {}
            }
        }

        run.reopen();
        self.store.save_run(&run).await?;
        let artifact = self.resolve_stage(&mut run, stage, &ctx, cancel).await?;
        if !artifact.is_usable() {
            run.fail(stage_failure(&artifact));
        }
        self.finish(&mut run, cancel).await?;
        Ok(run)
    }

    /// Loads a run record.
    pub async fn load_run(&self, run_id: RunId) -> Result<PipelineRun> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or(PanelcastError::RunNotFound(run_id))
    }

    /// The stored report, rendered fresh when none was written yet.
    pub async fn report(&self, run_id: RunId) -> Result<String> {
        if let Some(report) = self.store.load_report(run_id).await? {
            return Ok(report);
        }
        let run = self.load_run(run_id).await?;
        let artifacts = self.store.list(run_id).await?;
        Ok(render_report(&run, &artifacts))
    }

    async fn drive(&self, run: PipelineRun, cancel: &CancellationToken) -> Result<PipelineRun> {
        let span = tracing::info_span!("run", run_id = %run.run_id);
        self.drive_inner(run, cancel).instrument(span).await
    }

    async fn drive_inner(
        &self,
        mut run: PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        run.reopen();
        self.store.save_run(&run).await?;
        self.sink
            .emit(
                PipelineEvent::run(EventKind::RunStarted, run.run_id).with_data(json!({
                    "source": run.source.to_string(),
                    "target_duration_secs": run.target_duration_secs,
                })),
            )
            .await;
        info!(source = %run.source, target = run.target_duration_secs, "run started");

        let base = self.base_context(&run);
        let Some(mut ctx) = self.attach_pages(&mut run, base).await? else {
            self.finish(&mut run, cancel).await?;
            return Ok(run);
        };

        for stage in StageName::ALL {
            let _claim = self.claim(run.run_id, stage)?;
            let artifact = self.resolve_stage(&mut run, stage, &ctx, cancel).await?;
            if !artifact.is_usable() {
                run.fail(stage_failure(&artifact));
                break;
            }
            ctx = ctx.with_upstream(artifact);
        }

        self.finish(&mut run, cancel).await?;
        Ok(run)
    }

    /// Reuses a matching stored artifact or executes the stage, then
    /// records the outcome on the run.
    async fn resolve_stage(
        &self,
        run: &mut PipelineRun,
        stage: StageName,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<StageArtifact> {
        let definition = definition_for(stage);
        if let Ok(fingerprint) = definition.input_fingerprint(ctx) {
            if let Some(existing) = self.store.get(run.run_id, stage).await? {
                if existing.matches_inputs(&fingerprint) {
                    info!(stage = %stage, version = existing.version, "reusing stored artifact");
                    self.sink
                        .emit(
                            PipelineEvent::stage(EventKind::StageReused, run.run_id, stage)
                                .with_data(json!({ "version": existing.version })),
                        )
                        .await;
                    run.record(StageOutcome::from_artifact(&existing, true));
                    self.store.save_run(run).await?;
                    return Ok(existing);
                }
            }
        }

        let artifact = self
            .runner()
            .execute(&self.config.stage_spec(stage), &*definition, ctx, cancel)
            .await?;
        run.record(StageOutcome::from_artifact(&artifact, false));
        run.discard_after(stage);
        self.store.save_run(run).await?;
        Ok(artifact)
    }

    async fn finish(&self, run: &mut PipelineRun, cancel: &CancellationToken) -> Result<()> {
        let status = run.settle();
        self.store.save_run(run).await?;
        let artifacts = self.store.list(run.run_id).await?;
        self.store
            .save_report(run.run_id, &render_report(run, &artifacts))
            .await?;

        let cancelled = cancel.is_cancelled()
            && run
                .failure
                .as_ref()
                .is_some_and(|f| f.kind == ErrorKind::Cancelled);
        let kind = if cancelled {
            EventKind::RunCancelled
        } else {
            EventKind::RunCompleted
        };
        self.sink
            .emit(PipelineEvent::run(kind, run.run_id).with_data(json!({
                "status": status,
                "failure": run.failure.as_ref().map(ToString::to_string),
                "degraded_aspects": run.degraded_aspects(),
                "elapsed_ms": run.total_elapsed_ms(),
            })))
            .await;

        match status {
            RunStatus::Failed => warn!(
                failure = %run.failure.as_ref().map(ToString::to_string).unwrap_or_default(),
                "run failed"
            ),
            RunStatus::Partial => info!(degraded = run.degraded_aspects().len(), "run partial"),
            _ => info!(status = ?status, "run finished"),
        }
        Ok(())
    }
}

fn stage_failure(artifact: &StageArtifact) -> RunFailure {
    let (kind, message) = artifact.error.as_ref().map_or_else(
        || (ErrorKind::ContractViolation, "stage produced no payload".to_string()),
        |e| (e.kind, e.message.clone()),
    );
    RunFailure::new(Some(artifact.stage), kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveError, MockArchiveReader};
    use crate::core::ArtifactStatus;
    use crate::events::CollectingEventSink;
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{fixtures, ScriptedInferenceClient, StaticArchiveReader};
    use pretty_assertions::assert_eq;

    fn coordinator(
        client: ScriptedInferenceClient,
        reader: Arc<dyn ArchiveReader>,
    ) -> (PipelineCoordinator, Arc<ScriptedInferenceClient>, Arc<InMemoryArtifactStore>) {
        let client = Arc::new(client);
        let store = Arc::new(InMemoryArtifactStore::new());
        let coordinator = PipelineCoordinator::new(client.clone(), store.clone(), reader)
            .with_corpus(Arc::new(fixtures::corpus(3)));
        (coordinator, client, store)
    }

    #[tokio::test]
    async fn test_start_persists_pending_run() {
        let (coordinator, client, store) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let run = coordinator.start(SourceRef::new("a.cbz"), 75).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(store.load_run(run.run_id).await.unwrap(), Some(run));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_archive_read_failure_uses_mocked_reader() {
        let mut reader = MockArchiveReader::new();
        reader
            .expect_read()
            .times(1)
            .returning(|source, _| Err(ArchiveError::NoImages(source.to_string())));
        let (coordinator, client, store) =
            coordinator(ScriptedInferenceClient::happy_path(), Arc::new(reader));

        let run = coordinator.run(SourceRef::new("empty.cbz"), 75).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, None);
        assert_eq!(failure.kind, ErrorKind::InputUnavailable);
        assert_eq!(client.total_calls(), 0);
        assert_eq!(store.artifact_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_claim_is_rejected() {
        let (coordinator, _, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let run_id = RunId::new();
        let held = coordinator.claim(run_id, StageName::Review).unwrap();
        let err = coordinator.claim(run_id, StageName::Review).err().unwrap();
        assert!(matches!(err, PanelcastError::StageBusy(_)));
        assert!(coordinator.claim(run_id, StageName::Integrate).is_ok());
        drop(held);
        assert!(coordinator.claim(run_id, StageName::Review).is_ok());
    }

    #[tokio::test]
    async fn test_busy_stage_rejects_run_stage() {
        let (coordinator, client, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let run = coordinator.start(SourceRef::new("a.cbz"), 75).await.unwrap();
        let _held = coordinator.claim(run.run_id, StageName::Extract).unwrap();

        let err = coordinator
            .run_stage(run.run_id, StageName::Extract, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PanelcastError::StageBusy(e) if e.stage == StageName::Extract));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_stage_requires_predecessor() {
        let (coordinator, client, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let run = coordinator.start(SourceRef::new("a.cbz"), 75).await.unwrap();

        let err = coordinator
            .run_stage(run.run_id, StageName::Integrate, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PanelcastError::PredecessorUnresolved {
                stage: StageName::Integrate,
                predecessor: StageName::Review
            }
        ));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_stage_by_stage_matches_full_run() {
        let (coordinator, client, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let run = coordinator.start(SourceRef::new("a.cbz"), 75).await.unwrap();
        let cancel = CancellationToken::new();

        let after_extract = coordinator
            .run_stage(run.run_id, StageName::Extract, &cancel)
            .await
            .unwrap();
        assert_eq!(after_extract.status, RunStatus::Running);
        coordinator
            .run_stage(run.run_id, StageName::Review, &cancel)
            .await
            .unwrap();
        let done = coordinator
            .run_stage(run.run_id, StageName::Integrate, &cancel)
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(client.total_calls(), 3);
        let report = coordinator.report(run.run_id).await.unwrap();
        assert!(report.contains("## Titles"));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let (coordinator, _, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        assert!(matches!(
            coordinator.resume(RunId::new()).await,
            Err(PanelcastError::RunNotFound(_))
        ));
        assert!(matches!(
            coordinator.report(RunId::new()).await,
            Err(PanelcastError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_events_follow_run_lifecycle() {
        let sink = Arc::new(CollectingEventSink::new());
        let (coordinator, _, _) = coordinator(
            ScriptedInferenceClient::happy_path(),
            Arc::new(StaticArchiveReader::new(40)),
        );
        let coordinator = coordinator.with_sink(sink.clone());
        let run = coordinator.run(SourceRef::new("a.cbz"), 75).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(
            sink.names(),
            vec![
                "run.started",
                "stage.started",
                "stage.resolved",
                "stage.started",
                "stage.resolved",
                "stage.started",
                "stage.resolved",
                "run.completed",
            ]
        );
        assert!(run
            .stages
            .iter()
            .all(|o| o.status == ArtifactStatus::Ok && !o.reused));
    }
}
