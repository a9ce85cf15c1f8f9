/// Submission Pipeline
///
/// **Core Responsibility:**
/// Move one submission from `processing` to a terminal state, exactly once.
///
/// **Branches:**
/// - `complexity` mode: generated boilerplate, `*_TIME=` markers
/// - recognizable `Solution.solve` signature: cached wrapper, `LABEL:` markers
/// - anything else: run as-is, wall-clock duration is the only sample
///
/// A per-submission run lock keeps two invocations for the same id from
/// racing. Every failure inside a branch is persisted as `failed`; only a
/// missing submission or a broken store is returned to the caller.

use bigo_common::timing::MarkerFormat;
use bigo_common::{
    Language, LanguageRegistry, Submission, SubmissionMode, SubmissionStatus, SubmissionStore,
    SubmissionUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::WrapperCache;
use crate::engine::ExecutionEngine;
use crate::error::{PipelineError, ProcessingError};
use crate::evaluator;
use crate::llm::{ComplexityMetrics, Explainer};
use crate::transformer::CodeTransformer;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// This invocation wrote the terminal state
    Finished {
        status: SubmissionStatus,
        language: String,
    },
    /// Already completed or failed; nothing done
    AlreadyTerminal(SubmissionStatus),
    /// Another invocation holds the run lock
    InProgress,
}

/// Collaborators, wired in `main`
pub struct PipelineDeps {
    pub submissions: Arc<dyn SubmissionStore>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub cache: WrapperCache,
    pub transformer: CodeTransformer,
    pub explainer: Arc<dyn Explainer>,
    pub registry: Arc<LanguageRegistry>,
    pub run_lock_ttl: Duration,
}

pub struct Pipeline {
    submissions: Arc<dyn SubmissionStore>,
    engine: Arc<dyn ExecutionEngine>,
    cache: WrapperCache,
    transformer: CodeTransformer,
    explainer: Arc<dyn Explainer>,
    registry: Arc<LanguageRegistry>,
    run_lock_ttl: Duration,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            submissions: deps.submissions,
            engine: deps.engine,
            cache: deps.cache,
            transformer: deps.transformer,
            explainer: deps.explainer,
            registry: deps.registry,
            run_lock_ttl: deps.run_lock_ttl,
        }
    }

    pub async fn process(&self, id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        let submission = self
            .submissions
            .get_submission(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;

        if submission.status.is_terminal() {
            debug!(submission_id = %id, status = %submission.status, "Already terminal, skipping");
            return Ok(ProcessOutcome::AlreadyTerminal(submission.status));
        }

        let token = Uuid::new_v4();
        if !self.submissions.try_lock_run(id, token, self.run_lock_ttl).await? {
            debug!(submission_id = %id, "Run lock held elsewhere, skipping");
            return Ok(ProcessOutcome::InProgress);
        }

        let outcome = self.process_locked(id).await;

        if let Err(e) = self.submissions.unlock_run(id, token).await {
            warn!(submission_id = %id, error = %e, "Failed to release run lock");
        }
        outcome
    }

    async fn process_locked(&self, id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        // Re-read under the lock: a previous holder may have just finished
        let submission = self
            .submissions
            .get_submission(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;
        if submission.status.is_terminal() {
            return Ok(ProcessOutcome::AlreadyTerminal(submission.status));
        }

        if submission.status == SubmissionStatus::Pending {
            self.submissions
                .update_submission(id, SubmissionUpdate::processing())
                .await?;
        }

        info!(
            submission_id = %id,
            language = %submission.language,
            mode = ?submission.mode,
            "Processing submission"
        );

        let update = match self.run(&submission).await {
            Ok(update) => update,
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Submission failed");
                SubmissionUpdate::failed(e.to_string())
            }
        };
        let status = update.status.unwrap_or(SubmissionStatus::Failed);
        self.submissions.update_submission(id, update).await?;

        info!(submission_id = %id, %status, "Submission finished");
        Ok(ProcessOutcome::Finished {
            status,
            language: submission.language,
        })
    }

    async fn run(&self, submission: &Submission) -> Result<SubmissionUpdate, ProcessingError> {
        let language = self.registry.resolve(&submission.language)?;

        if submission.mode == Some(SubmissionMode::Complexity) {
            let program = self
                .transformer
                .transform(language, &submission.code, None)
                .await?;
            return self
                .measure(submission, language, &program, MarkerFormat::Assignment)
                .await;
        }

        match self.registry.extract_signature(&submission.code, language) {
            Some(signature) => {
                debug!(submission_id = %submission.id, %signature, "Using wrapper cache");
                let template = self.cache.obtain(language, &signature).await?;
                let program = self
                    .transformer
                    .transform(language, &submission.code, Some(&template))
                    .await?;
                self.measure(submission, language, &program, MarkerFormat::Labeled)
                    .await
            }
            None => self.run_direct(submission, language).await,
        }
    }

    /// Execute an instrumented program and turn its markers into a result
    async fn measure(
        &self,
        submission: &Submission,
        language: Language,
        program: &str,
        format: MarkerFormat,
    ) -> Result<SubmissionUpdate, ProcessingError> {
        let output = self
            .engine
            .execute(language, program, submission.input.as_deref())
            .await?;
        let report = evaluator::evaluate(&output, format)?;
        debug!(
            submission_id = %submission.id,
            complexity = %report.complexity,
            ratio1 = report.timing.ratio1(),
            ratio2 = report.timing.ratio2(),
            "Measured"
        );

        let explanation = self
            .explainer
            .explain(&submission.code, &report.metrics())
            .await
            .map_err(ProcessingError::Explanation)?;
        Ok(report.into_update(output.stdout, explanation))
    }

    async fn run_direct(&self, submission: &Submission, language: Language) -> Result<SubmissionUpdate, ProcessingError> {
        let output = self
            .engine
            .execute(language, &submission.code, submission.input.as_deref())
            .await?;
        let duration_ms = evaluator::evaluate_direct(&output)?;

        let explanation = self
            .explainer
            .explain(&submission.code, &ComplexityMetrics::single_run(duration_ms))
            .await
            .map_err(ProcessingError::Explanation)?;

        Ok(SubmissionUpdate {
            status: Some(SubmissionStatus::Completed),
            output: Some(output.stdout),
            execution_time: Some(duration_ms),
            ai_explanation: Some(explanation),
            ..Default::default()
        })
    }
}
