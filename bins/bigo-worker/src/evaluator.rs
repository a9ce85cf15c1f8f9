/// Complexity Evaluator - Output Interpretation
///
/// **Core Responsibility:**
/// Turn raw sandbox output into either a measurement or a typed failure.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about Redis
/// - Pure functions: (execution output, marker format) → report
///
/// **Rules:**
/// - A timed-out run is a timeout failure, whatever it printed
/// - A negative exit code is an infrastructure failure
/// - Otherwise the markers are parsed even when the exit code is non-zero;
///   a program that printed all three samples before crashing still measured
///   something

use bigo_common::timing::{estimate_complexity, parse_timings, ComplexityClass, MarkerFormat, ParsedTiming};
use bigo_common::{SubmissionStatus, SubmissionUpdate};

use crate::engine::ExecutionOutput;
use crate::error::ProcessingError;
use crate::llm::ComplexityMetrics;

/// Outcome of a successful doubling experiment
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexityReport {
    pub timing: ParsedTiming,
    pub complexity: ComplexityClass,
}

impl ComplexityReport {
    pub fn metrics(&self) -> ComplexityMetrics {
        ComplexityMetrics::from_timing(&self.timing, self.complexity.label())
    }

    /// Terminal update for a measured submission
    pub fn into_update(self, stdout: String, explanation: String) -> SubmissionUpdate {
        let label = self.complexity.label().to_string();
        SubmissionUpdate {
            status: Some(SubmissionStatus::Completed),
            output: Some(stdout),
            execution_time_small: Some(self.timing.small),
            execution_time_medium: Some(self.timing.medium),
            execution_time_large: Some(self.timing.large),
            estimated_complexity: Some(label.clone()),
            complexity: Some(label),
            ai_explanation: Some(explanation),
            ..Default::default()
        }
    }
}

/// Reject timeouts and sandbox failures
pub fn check_execution(output: &ExecutionOutput) -> Result<(), ProcessingError> {
    if output.timed_out {
        return Err(ProcessingError::TimedOut(output.duration_ms));
    }
    if output.is_infrastructure_failure() {
        return Err(ProcessingError::Infrastructure(output.stderr.clone()));
    }
    Ok(())
}

pub fn evaluate(output: &ExecutionOutput, format: MarkerFormat) -> Result<ComplexityReport, ProcessingError> {
    check_execution(output)?;
    let timing = parse_timings(&output.stdout, format)?;
    let complexity = estimate_complexity(timing.small, timing.medium, timing.large);
    Ok(ComplexityReport { timing, complexity })
}

/// Legacy single-run path: the program must exit cleanly
pub fn evaluate_direct(output: &ExecutionOutput) -> Result<f64, ProcessingError> {
    check_execution(output)?;
    if output.exit_code != 0 {
        return Err(ProcessingError::RuntimeError {
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.duration_ms as f64)
}
