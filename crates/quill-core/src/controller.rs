//! The stage controller
//!
//! Owns one session end to end: validates the contract, walks the stage
//! machine, drives the increment loop, and on any failure leaves a failure
//! report and every durable artifact behind. The session's canonical state
//! and manifest are mutated only here.

use crate::assembler::{Assembler, ArtifactPass, PassReport};
use crate::error::PipelineError;
use crate::events::{HeartbeatGuard, HeartbeatStatus, ProgressChannel, ProgressKind};
use crate::generator::{GeneratedIncrement, IncrementGenerator, IncrementRequest};
use crate::registry::SessionRegistry;
use crate::types::{Session, SessionConfig, SessionId, Stage};
use chrono::Utc;
use quill_extract::DeltaExtractor;
use quill_gate::{GateInput, GateValidator};
use quill_oracle::{ExtractionOracle, GenerationOracle};
use quill_state::{CanonicalState, StateUpdater};
use quill_store::{FailureReport, IncrementFile, IncrementStore, Manifest, ManifestEntry};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal summary of a successful run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Session that ran
    pub session_id: SessionId,
    /// Increments produced
    pub increments: u64,
    /// Final artifact size in words
    pub total_size: u64,
    /// Where the assembled artifact landed
    pub artifact_path: PathBuf,
}

/// Requests cooperative cancellation of a running session
///
/// The controller honors the request at the next increment boundary; the
/// in-flight increment completes and persists first.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle and the receiver the controller watches
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, receiver)
    }

    /// Request cancellation
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Mutable per-run context
struct RunCtx {
    session: Session,
    sid: String,
    instructions: String,
    state: CanonicalState,
    manifest: Manifest,
    prior_text: Option<String>,
}

/// Drives sessions through the stage machine
pub struct StageController<G, E> {
    generator: IncrementGenerator<G>,
    extractor: DeltaExtractor<E>,
    store: IncrementStore,
    gate: GateValidator,
    updater: StateUpdater,
    assembler: Assembler,
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    channel: ProgressChannel,
    audit_pass: Option<Box<dyn ArtifactPass>>,
    refinement_pass: Option<Box<dyn ArtifactPass>>,
    cancel: watch::Receiver<bool>,
}

impl<G: GenerationOracle, E: ExtractionOracle> StageController<G, E> {
    /// Create a controller
    #[must_use]
    pub fn new(
        generation_oracle: G,
        extraction_oracle: E,
        store: IncrementStore,
        config: SessionConfig,
        registry: Arc<SessionRegistry>,
        channel: ProgressChannel,
    ) -> Self {
        let generator = IncrementGenerator::new(generation_oracle, config.generation_budget);
        let extractor = DeltaExtractor::new(extraction_oracle, config.extraction_budget);
        let (_sender, cancel) = watch::channel(false);
        Self {
            generator,
            extractor,
            store,
            gate: GateValidator::new(),
            updater: StateUpdater::new(),
            assembler: Assembler::new(),
            config,
            registry,
            channel,
            audit_pass: None,
            refinement_pass: None,
            cancel,
        }
    }

    /// With an audit pass
    #[must_use]
    pub fn with_audit_pass(mut self, pass: Box<dyn ArtifactPass>) -> Self {
        self.audit_pass = Some(pass);
        self
    }

    /// With a refinement pass
    #[must_use]
    pub fn with_refinement_pass(mut self, pass: Box<dyn ArtifactPass>) -> Self {
        self.refinement_pass = Some(pass);
        self
    }

    /// With a cancellation receiver, usually from [`CancelHandle::new`]
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a fresh session to completion
    ///
    /// # Errors
    /// Any pipeline error; a failure report and all durable artifacts remain
    /// under the session directory.
    pub async fn run(
        &self,
        session: Session,
        instructions: impl Into<String>,
    ) -> Result<PipelineOutcome, PipelineError> {
        session.contract.validate()?;
        let sid = session.id.to_string();
        let state = CanonicalState::from_contract(&session.contract);
        let manifest = Manifest::new(sid.clone());
        self.launch(RunCtx {
            session,
            sid,
            instructions: instructions.into(),
            state,
            manifest,
            prior_text: None,
        })
        .await
    }

    /// Resume a session from its durable increments
    ///
    /// Rebuilds the manifest and canonical state by re-reading every intact
    /// increment and re-extracting its delta (extraction is idempotent over
    /// the same text), then continues the run where it left off. The given
    /// session must carry the id of the on-disk session directory and be in
    /// `Init`.
    ///
    /// # Errors
    /// `SessionNotFound` if no durable increments exist; otherwise as [`run`].
    ///
    /// [`run`]: StageController::run
    pub async fn resume(
        &self,
        session: Session,
        instructions: impl Into<String>,
    ) -> Result<PipelineOutcome, PipelineError> {
        session.contract.validate()?;
        let sid = session.id.to_string();

        let increments = self.store.load_all(&sid).await?;
        let mut manifest = Manifest::new(sid.clone());
        let mut state = CanonicalState::from_contract(&session.contract);
        let mut prior_text = None;

        for increment in &increments {
            if increment.sequence != manifest.next_sequence() {
                tracing::warn!(
                    session = %sid,
                    sequence = increment.sequence,
                    "gap in recovered increments; resuming from before the gap"
                );
                break;
            }
            manifest.append(ManifestEntry {
                number: increment.sequence,
                filename: IncrementFile::filename(increment.sequence),
                size: increment.size,
                saved_at: increment.saved_at,
                checksum: increment.checksum.clone(),
            })?;
            self.apply_extracted(&mut state, &increment.text, increment.sequence)
                .await;
            prior_text = Some(increment.text.clone());
        }

        self.store.rewrite_manifest(&manifest).await?;
        self.store.save_state(&sid, &state).await?;
        tracing::info!(
            session = %sid,
            recovered = manifest.total_increments,
            "session resumed from durable increments"
        );

        self.launch(RunCtx {
            session,
            sid,
            instructions: instructions.into(),
            state,
            manifest,
            prior_text,
        })
        .await
    }

    async fn launch(&self, mut ctx: RunCtx) -> Result<PipelineOutcome, PipelineError> {
        self.registry.insert(ctx.session.clone());
        self.channel.emit(ProgressKind::JobCreated {
            session_id: ctx.session.id,
            target_size: ctx.session.target_size,
        });

        let status = HeartbeatStatus::new();
        status.set_increments(ctx.manifest.total_increments);
        let _heartbeat = HeartbeatGuard::start(
            self.channel.clone(),
            Arc::clone(&status),
            self.config.heartbeat_interval,
        );

        match self.run_stages(&mut ctx, &status).await {
            Ok(artifact_path) => {
                self.channel.emit(ProgressKind::Complete {
                    increments: ctx.manifest.total_increments,
                    total_size: ctx.manifest.total_size,
                });
                tracing::info!(
                    session = %ctx.sid,
                    increments = ctx.manifest.total_increments,
                    total_size = ctx.manifest.total_size,
                    "session complete"
                );
                Ok(PipelineOutcome {
                    session_id: ctx.session.id,
                    increments: ctx.manifest.total_increments,
                    total_size: ctx.manifest.total_size,
                    artifact_path,
                })
            }
            Err(error) => Err(self.fail(&ctx, error).await),
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut RunCtx,
        status: &Arc<HeartbeatStatus>,
    ) -> Result<PathBuf, PipelineError> {
        self.advance(ctx, status, Stage::DraftGeneration)?;
        self.staged(Stage::DraftGeneration, self.draft_loop(ctx, status))
            .await?;

        self.advance(ctx, status, Stage::Assembly)?;
        let mut artifact = self.staged(Stage::Assembly, self.assemble_artifact(ctx)).await?;
        if self.config.reextract_before_audit {
            self.staged(Stage::Assembly, self.reextract(ctx)).await?;
        }

        let mut prior_report: Option<PassReport> = None;
        if self.config.run_audit {
            if let Some(pass) = &self.audit_pass {
                self.advance(ctx, status, Stage::Audit)?;
                let (audited, report) =
                    self.staged(Stage::Audit, pass.run(artifact, None)).await?;
                self.store
                    .write_pass_report(&ctx.sid, pass.name(), &report)
                    .await?;
                artifact = audited;
                prior_report = Some(report);
            }
        }
        if self.config.run_refinement {
            if let Some(pass) = &self.refinement_pass {
                self.advance(ctx, status, Stage::Refinement)?;
                let (refined, report) = self
                    .staged(Stage::Refinement, pass.run(artifact, prior_report.as_ref()))
                    .await?;
                self.store
                    .write_pass_report(&ctx.sid, pass.name(), &report)
                    .await?;
                artifact = refined;
            }
        }

        self.advance(ctx, status, Stage::Packaging)?;
        let artifact_path = self
            .staged(Stage::Packaging, async {
                Ok(self.store.write_artifact(&ctx.sid, &artifact).await?)
            })
            .await?;
        self.advance(ctx, status, Stage::Complete)?;
        Ok(artifact_path)
    }

    /// The increment loop
    async fn draft_loop(
        &self,
        ctx: &mut RunCtx,
        status: &Arc<HeartbeatStatus>,
    ) -> Result<(), PipelineError> {
        if ctx.manifest.total_increments == 0 {
            self.store.save_state(&ctx.sid, &ctx.state).await?;
        }

        while ctx.manifest.total_size < ctx.session.target_size {
            if *self.cancel.borrow() {
                return Err(PipelineError::Cancelled);
            }

            let remaining = ctx.session.target_size - ctx.manifest.total_size;
            let target = remaining.min(self.config.chunk_size);
            let is_final = remaining <= self.config.chunk_size;
            let sequence = ctx.manifest.next_sequence();

            self.channel.emit(ProgressKind::IncrementStart { sequence });
            let generated = self
                .generate_with_retry(IncrementRequest {
                    instructions: &ctx.instructions,
                    state: &ctx.state,
                    prior_text: ctx.prior_text.as_deref(),
                    target_size: target,
                    size_tolerance: self.config.size_tolerance,
                    sequence,
                    is_first: sequence == 1,
                    is_final,
                })
                .await?;

            // Durable first; everything downstream of the persist is advisory
            // or judgmental and must not lose the prose.
            let persisted = self
                .store
                .persist(&ctx.sid, sequence, &generated.text, generated.size)
                .await?;
            ctx.manifest.append(persisted.entry)?;
            self.store.rewrite_manifest(&ctx.manifest).await?;

            let before = ctx.state.clone();
            self.apply_extracted(&mut ctx.state, &generated.text, sequence)
                .await;
            self.store.save_state(&ctx.sid, &ctx.state).await?;

            if self.config.gate_every_increment || is_final {
                let result = self
                    .gate
                    .evaluate(GateInput {
                        contract: &ctx.session.contract,
                        before: &before,
                        after: &ctx.state,
                        text: &generated.text,
                        sequence,
                        is_final,
                        target_size: target,
                    })
                    .await;
                self.store
                    .write_gate_audit(&ctx.sid, sequence, &result)
                    .await?;
                if result.must_stop() {
                    return Err(PipelineError::GateFailure {
                        sequence,
                        failures: result.critical_failures,
                    });
                }
            }

            status.record_increment();
            self.channel.emit(ProgressKind::IncrementComplete {
                sequence,
                size: generated.size,
                total_size: ctx.manifest.total_size,
            });
            ctx.prior_text = Some(generated.text);
        }
        Ok(())
    }

    /// Extract a delta from `text` and fold it into `state`
    async fn apply_extracted(&self, state: &mut CanonicalState, text: &str, sequence: u64) {
        let outcome = {
            let active = state.active_slots();
            self.extractor.extract(text, &active).await
        };
        let update = self.updater.apply(state, &outcome.delta, sequence);
        tracing::debug!(
            sequence,
            source = ?outcome.source,
            applied = update.applied.len(),
            skipped = update.skipped.len(),
            "delta applied"
        );
    }

    async fn generate_with_retry(
        &self,
        request: IncrementRequest<'_>,
    ) -> Result<GeneratedIncrement, PipelineError> {
        let attempts = self.config.max_generation_retries + 1;
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 2);
                tracing::warn!(
                    sequence = request.sequence,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "generation retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            match self.generator.generate(request).await {
                Ok(generated) => return Ok(generated),
                Err(PipelineError::GenerationFailed { message, .. }) => last_message = message,
                Err(other) => return Err(other),
            }
        }

        Err(PipelineError::GenerationFailed {
            attempts,
            message: last_message,
        })
    }

    /// Two-tier assembly: exactly the set the manifest names, or a directory
    /// scan over whatever intact increments remain when that set is
    /// unreadable
    async fn assemble_artifact(&self, ctx: &RunCtx) -> Result<String, PipelineError> {
        match self.load_manifest_increments(ctx).await {
            Ok(increments) => return Ok(self.assembler.assemble(&increments)),
            Err(error) => {
                tracing::warn!(
                    session = %ctx.sid,
                    %error,
                    "manifest-driven assembly failed; scanning the session directory"
                );
            }
        }

        let increments = self.store.load_all(&ctx.sid).await?;
        if increments.is_empty() {
            return Err(PipelineError::AssemblyFailed(
                "no readable increments on disk".to_string(),
            ));
        }
        let expected = ctx.manifest.total_increments;
        if (increments.len() as u64) < expected {
            tracing::warn!(
                session = %ctx.sid,
                expected,
                readable = increments.len(),
                "assembling from partial increment set"
            );
        }
        Ok(self.assembler.assemble(&increments))
    }

    /// Resolve every manifest entry to its on-disk increment
    ///
    /// A stray file the manifest never recorded is ignored; a listed file
    /// that is missing, torn, or mismatched fails the whole set.
    async fn load_manifest_increments(
        &self,
        ctx: &RunCtx,
    ) -> Result<Vec<IncrementFile>, PipelineError> {
        if ctx.manifest.entries.is_empty() {
            return Err(PipelineError::AssemblyFailed(
                "manifest names no increments".to_string(),
            ));
        }
        let mut increments = Vec::with_capacity(ctx.manifest.entries.len());
        for entry in &ctx.manifest.entries {
            let increment = self
                .store
                .load_increment(&ctx.sid, &entry.filename)
                .await?;
            if increment.checksum != entry.checksum {
                return Err(PipelineError::AssemblyFailed(format!(
                    "{} does not match its manifest checksum",
                    entry.filename
                )));
            }
            increments.push(increment);
        }
        Ok(increments)
    }

    /// Rebuild canonical state from scratch over every durable increment
    async fn reextract(&self, ctx: &mut RunCtx) -> Result<(), PipelineError> {
        let increments = self.store.load_all(&ctx.sid).await?;
        let mut state = CanonicalState::from_contract(&ctx.session.contract);
        for increment in &increments {
            self.apply_extracted(&mut state, &increment.text, increment.sequence)
                .await;
        }
        ctx.state = state;
        self.store.save_state(&ctx.sid, &ctx.state).await?;
        Ok(())
    }

    fn advance(
        &self,
        ctx: &mut RunCtx,
        status: &Arc<HeartbeatStatus>,
        to: Stage,
    ) -> Result<(), PipelineError> {
        let from = ctx.session.stage;
        if !from.can_advance_to(to) {
            return Err(PipelineError::IllegalTransition { from, to });
        }
        if from != Stage::Init {
            self.channel.emit(ProgressKind::StageComplete { stage: from });
        }
        ctx.session.stage = to;
        ctx.session.updated_at = Utc::now();
        self.registry.update_stage(&ctx.session.id, to);
        status.set_stage(to);
        if !to.is_terminal() {
            self.channel.emit(ProgressKind::StageStart { stage: to });
        }
        tracing::info!(session = %ctx.sid, %from, %to, "stage advanced");
        Ok(())
    }

    async fn staged<T, F>(&self, stage: Stage, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        match tokio::time::timeout(self.config.stage_budget, work).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::StageTimeout {
                stage,
                budget_secs: self.config.stage_budget.as_secs(),
            }),
        }
    }

    /// Terminal failure path: mark, report, preserve, surface
    async fn fail(&self, ctx: &RunCtx, error: PipelineError) -> PipelineError {
        let stage = ctx.session.stage;
        tracing::error!(session = %ctx.sid, %stage, %error, "session failed");

        self.registry.update_stage(&ctx.session.id, Stage::Failed);
        self.channel.emit(ProgressKind::Error {
            stage,
            message: error.to_string(),
            error_class: error.error_class().to_string(),
        });

        let artifacts: Vec<String> = ctx
            .manifest
            .entries
            .iter()
            .map(|entry| entry.filename.clone())
            .collect();
        let report = FailureReport::new(
            &ctx.sid,
            stage.name(),
            error.to_string(),
            error.error_class(),
        )
        .with_progress(ctx.manifest.total_increments, ctx.manifest.total_size)
        .with_artifacts(artifacts);

        if let Err(write_error) = self.store.write_failure_report(&report).await {
            tracing::error!(session = %ctx.sid, %write_error, "failure report not written");
        }
        if let Err(save_error) = self.store.save_state(&ctx.sid, &ctx.state).await {
            tracing::error!(session = %ctx.sid, %save_error, "final state snapshot not written");
        }
        error
    }
}
