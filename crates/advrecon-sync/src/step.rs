//! Uniform "run step, capture outcome" handling plus the error sink.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One captured failure, forwarded to the [`ErrorSink`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub run_id: Uuid,
    pub step: String,
    pub context: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Fire-and-forget side channel for captured failures. Never consulted for
/// control flow.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn capture(&self, report: &FailureReport) -> Result<()>;
}

/// Default sink when no webhook is configured; `FailureReporter` has already logged.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl ErrorSink for NoopSink {
    async fn capture(&self, _report: &FailureReport) -> Result<()> {
        Ok(())
    }
}

/// Posts each failure as JSON to an incoming webhook.
pub struct WebhookSink {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ErrorSink for WebhookSink {
    async fn capture(&self, report: &FailureReport) -> Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(report)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("error webhook returned {status}");
        }
        Ok(())
    }
}

/// Logs a failure and hands it to the sink. Cheap to clone into jobs.
#[derive(Clone)]
pub struct FailureReporter {
    run_id: Uuid,
    sink: Arc<dyn ErrorSink>,
}

impl FailureReporter {
    pub fn new(run_id: Uuid, sink: Arc<dyn ErrorSink>) -> Self {
        Self { run_id, sink }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn capture(&self, step: &str, context: impl Into<String>, err: &anyhow::Error) {
        let context = context.into();
        let message = format!("{err:#}");
        error!(run_id = %self.run_id, step, context = %context, error = %message, "captured failure");

        let report = FailureReport {
            run_id: self.run_id,
            step: step.to_string(),
            context,
            error: message,
            occurred_at: Utc::now(),
        };
        if let Err(sink_err) = self.sink.capture(&report).await {
            warn!(run_id = %self.run_id, step, error = %sink_err, "error sink rejected report");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub status: StepStatus,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Runs job steps in order, recording each outcome. A failed step is reported
/// and the runner moves on.
pub struct StepRunner {
    reporter: FailureReporter,
    outcomes: Vec<StepOutcome>,
}

impl StepRunner {
    pub fn new(reporter: FailureReporter) -> Self {
        Self {
            reporter,
            outcomes: Vec::new(),
        }
    }

    pub async fn run<T, F>(&mut self, step: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
        T: fmt::Display,
    {
        let run_id = self.reporter.run_id();
        let started = Instant::now();
        info!(%run_id, step, "step started");

        let result = fut.instrument(info_span!("step", %run_id, step)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(summary) => {
                info!(%run_id, step, elapsed_ms, %summary, "step completed");
                self.outcomes.push(StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Completed,
                    detail: summary.to_string(),
                    elapsed_ms,
                });
                Some(summary)
            }
            Err(err) => {
                self.reporter.capture(step, "step aborted", &err).await;
                self.outcomes.push(StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Failed,
                    detail: format!("{err:#}"),
                    elapsed_ms,
                });
                None
            }
        }
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<StepOutcome> {
        self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::RecordingSink;

    #[tokio::test]
    async fn failed_step_is_reported_and_runner_continues() {
        let sink = Arc::new(RecordingSink::default());
        let mut runner = StepRunner::new(FailureReporter::new(Uuid::new_v4(), sink.clone()));

        let first: Option<u32> = runner
            .run("broken", async { Err(anyhow::anyhow!("database went away")) })
            .await;
        let second = runner.run("healthy", async { Ok::<_, anyhow::Error>(7u32) }).await;

        assert!(first.is_none());
        assert_eq!(second, Some(7));
        let outcomes = runner.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, StepStatus::Failed);
        assert_eq!(outcomes[0].detail, "database went away");
        assert_eq!(outcomes[1].status, StepStatus::Completed);
        assert_eq!(outcomes[1].detail, "7");

        let reports = sink.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].step, "broken");
        assert_eq!(reports[0].context, "step aborted");
    }

    #[tokio::test]
    async fn noop_sink_swallows_reports() {
        let reporter = FailureReporter::new(Uuid::new_v4(), Arc::new(NoopSink));
        let mut runner = StepRunner::new(reporter);
        let result: Option<u32> = runner
            .run("broken", async { Err(anyhow::anyhow!("helpdesk unavailable")) })
            .await;
        assert!(result.is_none());
        assert_eq!(runner.outcomes()[0].status, StepStatus::Failed);
    }
}
