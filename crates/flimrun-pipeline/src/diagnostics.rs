//! Run diagnostics: one record per stage invocation.
//!
//! Every call to [`run`](crate::run) collects a [`RunReport`] alongside
//! the side effects of the stages. Under the best-effort policy the
//! report is the only place where tolerated failures remain visible.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::runner::StageStatus;
use crate::stage::{StageInvocation, StageKind};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Time source for stage durations.
pub trait Clock {
    /// Opaque instant type.
    type Instant;

    /// Current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The process exited with code zero.
    Succeeded,
    /// The process ran and failed.
    Failed {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
    },
    /// The process could not be started.
    SpawnFailed {
        /// The spawn error message.
        message: String,
    },
}

impl InvocationOutcome {
    /// Classify a runner result.
    #[must_use]
    pub fn from_result(result: &std::io::Result<StageStatus>) -> Self {
        match result {
            Ok(status) if status.success() => Self::Succeeded,
            Ok(status) => Self::Failed { code: status.code },
            Err(e) => Self::SpawnFailed {
                message: e.to_string(),
            },
        }
    }

    /// Returns `true` for [`Succeeded`](Self::Succeeded).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Diagnostics for a single stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Which stage ran.
    pub stage: StageKind,
    /// Layer index, for per-layer stages.
    pub layer: Option<i32>,
    /// Program that was executed.
    pub program: String,
    /// Arguments it was given.
    pub args: Vec<String>,
    /// How it ended.
    #[serde(flatten)]
    pub outcome: InvocationOutcome,
    /// Wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl InvocationRecord {
    /// Build a record from an invocation and its result.
    #[must_use]
    pub fn new(
        invocation: &StageInvocation,
        result: &std::io::Result<StageStatus>,
        duration: Duration,
    ) -> Self {
        Self {
            stage: invocation.kind,
            layer: invocation.layer,
            program: invocation.program.clone(),
            args: invocation.args.clone(),
            outcome: InvocationOutcome::from_result(result),
            duration,
        }
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Stage invocations in execution order.
    pub invocations: Vec<InvocationRecord>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunReport {
    /// Number of invocations that did not succeed.
    ///
    /// The cleanup stage counts as well, even though it never aborts a
    /// run.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.invocations
            .iter()
            .filter(|r| !r.outcome.is_success())
            .count()
    }

    /// Invocations of one stage kind, in order.
    pub fn of_stage(&self, stage: StageKind) -> impl Iterator<Item = &InvocationRecord> {
        self.invocations.iter().filter(move |r| r.stage == stage)
    }

    /// Format the report as a human-readable table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Run Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>6} {:>12}  {}",
            "Stage", "Layer", "Duration", "Outcome"
        ));
        lines.push("-".repeat(70));

        for record in &self.invocations {
            let layer = record
                .layer
                .map_or_else(|| "-".to_owned(), |l| l.to_string());
            let ms = duration_ms(record.duration);
            let outcome = format_outcome(&record.outcome);
            lines.push(format!(
                "{:<24} {layer:>6} {ms:>10.3}ms  {outcome}",
                record.stage.name()
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "Invocations: {}  |  Failures: {}",
            self.invocations.len(),
            self.failure_count(),
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_outcome(outcome: &InvocationOutcome) -> String {
    match outcome {
        InvocationOutcome::Succeeded => "ok".to_owned(),
        InvocationOutcome::Failed { code: Some(code) } => format!("failed (exit {code})"),
        InvocationOutcome::Failed { code: None } => "failed (signal)".to_owned(),
        InvocationOutcome::SpawnFailed { message } => format!("not started: {message}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use super::*;

    fn invocation(kind: StageKind, layer: Option<i32>) -> StageInvocation {
        StageInvocation {
            kind,
            layer,
            program: kind.name().to_owned(),
            args: vec!["a".to_owned()],
            current_dir: None,
        }
    }

    fn sample_report() -> RunReport {
        RunReport {
            invocations: vec![
                InvocationRecord::new(
                    &invocation(StageKind::Cleanup, None),
                    &Err(io::Error::new(io::ErrorKind::NotFound, "no python3")),
                    Duration::from_millis(1),
                ),
                InvocationRecord::new(
                    &invocation(StageKind::BuildModel, Some(1)),
                    &Ok(StageStatus::SUCCESS),
                    Duration::from_millis(250),
                ),
                InvocationRecord::new(
                    &invocation(StageKind::Encode, Some(1)),
                    &Ok(StageStatus::exited(2)),
                    Duration::from_millis(40),
                ),
            ],
            total_duration: Duration::from_millis(300),
        }
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(
            InvocationOutcome::from_result(&Ok(StageStatus::SUCCESS)),
            InvocationOutcome::Succeeded
        );
        assert_eq!(
            InvocationOutcome::from_result(&Ok(StageStatus { code: None })),
            InvocationOutcome::Failed { code: None }
        );
        assert!(matches!(
            InvocationOutcome::from_result(&Err(io::Error::other("boom"))),
            InvocationOutcome::SpawnFailed { .. }
        ));
    }

    #[test]
    fn failure_count_includes_spawn_errors() {
        assert_eq!(sample_report().failure_count(), 2);
    }

    #[test]
    fn of_stage_filters() {
        let report = sample_report();
        assert_eq!(report.of_stage(StageKind::Encode).count(), 1);
        assert_eq!(report.of_stage(StageKind::Decode).count(), 0);
    }

    #[test]
    fn report_lists_every_invocation() {
        let text = sample_report().report();
        assert!(text.contains("create_layer_model"));
        assert!(text.contains("failed (exit 2)"));
        assert!(text.contains("not started: no python3"));
        assert!(text.contains("Invocations: 3  |  Failures: 2"));
    }

    #[test]
    fn json_uses_fractional_seconds_and_flat_outcome() {
        let report = sample_report();
        let value = serde_json::to_value(&report).unwrap();
        let total = value["total_duration"].as_f64().unwrap();
        assert!((total - 0.3).abs() < 1e-9);

        let encode = &value["invocations"][2];
        assert_eq!(encode["stage"], "encode");
        assert_eq!(encode["outcome"], "failed");
        assert_eq!(encode["code"], 2);

        let back: RunReport = serde_json::from_value(value).unwrap();
        assert_eq!(back.invocations.len(), 3);
        assert_eq!(back.invocations[2].outcome, report.invocations[2].outcome);
        assert_eq!(back.invocations[1].layer, Some(1));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"invocations": [], "total_duration": -1.0}"#;
        assert!(serde_json::from_str::<RunReport>(json).is_err());
    }
}
