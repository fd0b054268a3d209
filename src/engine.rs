use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;

use crate::command::{Invocation, ToolRunner};
use crate::error::PipelineError;

/// Bounded retry for a numerical engine stage.
///
/// A failed or timed-out attempt counts as success when the stage's terminal
/// artifact is already on disk: the engine is known to report spurious
/// failures after writing correct output. Otherwise the stage waits
/// `backoff` and tries again, up to `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn series_default() -> Self {
        Self {
            max_attempts: 2,
            timeout: Duration::from_secs(120),
            backoff: Duration::from_secs(60),
        }
    }

    pub fn aggregate_default() -> Self {
        Self {
            max_attempts: 2,
            timeout: Duration::from_secs(800),
            backoff: Duration::from_secs(600),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub enum EngineOutcome {
    Success { attempts: u32 },
    /// The engine reported an error but its output artifact exists.
    FallbackSuccess { attempts: u32, cause: String },
    Failure { attempts: u32, cause: PipelineError },
}

impl EngineOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            EngineOutcome::Success { attempts }
            | EngineOutcome::FallbackSuccess { attempts, .. }
            | EngineOutcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, EngineOutcome::FallbackSuccess { .. })
    }

    /// Turns a failure into the run-aborting error for `stage`. A timeout on
    /// the final attempt is reported as such.
    pub fn into_result(self, stage: &str) -> Result<EngineOutcome, PipelineError> {
        match self {
            EngineOutcome::Failure {
                cause: timeout @ PipelineError::EngineTimeout { .. },
                ..
            } => Err(timeout),
            EngineOutcome::Failure { attempts, cause } => Err(PipelineError::Engine {
                stage: stage.to_string(),
                attempts,
                message: cause.to_string(),
            }),
            outcome => Ok(outcome),
        }
    }
}

pub fn run_with_policy<R: ToolRunner>(
    runner: &R,
    policy: &RetryPolicy,
    invocation: Invocation,
    terminal_artifact: &Utf8Path,
) -> EngineOutcome {
    let invocation = invocation.with_timeout(policy.timeout);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match runner.run(&invocation) {
            Ok(_) => return EngineOutcome::Success { attempts },
            Err(err) => err,
        };

        if terminal_artifact.exists() {
            tracing::warn!(
                artifact = %terminal_artifact,
                error = %err,
                "engine reported a failure but its output exists; accepting it"
            );
            return EngineOutcome::FallbackSuccess {
                attempts,
                cause: err.to_string(),
            };
        }
        if attempts >= policy.max_attempts {
            return EngineOutcome::Failure { attempts, cause: err };
        }

        tracing::warn!(
            error = %err,
            backoff_secs = policy.backoff.as_secs(),
            "engine attempt {attempts} failed; retrying after backoff"
        );
        thread::sleep(policy.backoff);
    }
}
