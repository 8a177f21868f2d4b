//! Reconciliation pipeline orchestration.

use std::fmt;
use std::sync::Arc;

use advrecon_core::{Category, ACCEPTED_STORE_ID};
use advrecon_helpdesk::{HelpdeskClient, ZendeskClient};
use advrecon_storage::{PgStore, ReconStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub mod annotate;
pub mod cleanup;
pub mod config;
pub mod refresh;
pub mod satisfaction;
pub mod step;

pub use annotate::{annotate_inventory, AnnotationVariant};
pub use cleanup::cleanup_tickets;
pub use config::{JobSettings, ReconConfig};
pub use refresh::refresh_candidates;
pub use satisfaction::reconcile_satisfaction;
pub use step::{ErrorSink, FailureReport, FailureReporter, StepOutcome, StepRunner, StepStatus, NoopSink, WebhookSink};

pub const CRATE_NAME: &str = "advrecon-sync";

/// Everything a job needs for one run.
pub struct JobEnv<'a> {
    pub store: &'a dyn ReconStore,
    pub helpdesk: &'a dyn HelpdeskClient,
    pub reporter: FailureReporter,
    pub settings: JobSettings,
    pub now: DateTime<Utc>,
}

/// Only the accepted store may trigger a run, either from configuration or
/// from the request that started it.
#[derive(Debug, Clone, Default)]
pub struct StoreGate {
    pub configured: Option<String>,
    pub requested: Option<String>,
}

impl StoreGate {
    pub fn new(configured: Option<String>, requested: Option<String>) -> Self {
        Self { configured, requested }
    }

    pub fn accepts(&self) -> bool {
        [&self.configured, &self.requested]
            .into_iter()
            .flatten()
            .any(|id| id.trim() == ACCEPTED_STORE_ID)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skipped: bool,
    pub steps: Vec<StepOutcome>,
}

impl RunSummary {
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "run_id={} skipped (store gate)", self.run_id);
        }
        write!(
            f,
            "run_id={} steps={} failed_steps={} elapsed_ms={}",
            self.run_id,
            self.steps.len(),
            self.failed_steps(),
            (self.finished_at - self.started_at).num_milliseconds()
        )
    }
}

pub struct Reconciler {
    settings: JobSettings,
    store: Arc<dyn ReconStore>,
    helpdesk: Arc<dyn HelpdeskClient>,
    sink: Arc<dyn ErrorSink>,
}

impl Reconciler {
    pub fn new(
        settings: JobSettings,
        store: Arc<dyn ReconStore>,
        helpdesk: Arc<dyn HelpdeskClient>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            settings,
            store,
            helpdesk,
            sink,
        }
    }

    pub async fn run_once(&self, gate: &StoreGate) -> RunSummary {
        self.run_once_at(gate, Utc::now()).await
    }

    /// Runs every job in order. Failures are captured per step; cleanup always
    /// runs last.
    pub async fn run_once_at(&self, gate: &StoreGate, now: DateTime<Utc>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        if !gate.accepts() {
            info!(%run_id, configured = ?gate.configured, requested = ?gate.requested, "store not accepted; skipping run");
            return RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                skipped: true,
                steps: Vec::new(),
            };
        }

        info!(%run_id, "reconcile run started");
        let reporter = FailureReporter::new(run_id, self.sink.clone());
        let env = JobEnv {
            store: self.store.as_ref(),
            helpdesk: self.helpdesk.as_ref(),
            reporter: reporter.clone(),
            settings: self.settings.clone(),
            now,
        };
        let mut runner = StepRunner::new(reporter);

        for category in [Category::LowSpend, Category::OutOfBudget] {
            runner
                .run(satisfaction::step_name(category), reconcile_satisfaction(&env, category))
                .await;
        }
        runner.run(refresh::STEP, refresh_candidates(&env)).await;
        for category in [Category::HighAcos, Category::GenericHighAcos] {
            runner
                .run(satisfaction::step_name(category), reconcile_satisfaction(&env, category))
                .await;
        }
        for variant in [AnnotationVariant::Advert, AnnotationVariant::Keyword] {
            runner
                .run(variant.step(), annotate_inventory(&env, variant))
                .await;
        }
        runner.run(cleanup::STEP, cleanup_tickets(&env)).await;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            skipped: false,
            steps: runner.into_outcomes(),
        };
        info!(%summary, "reconcile run finished");
        summary
    }
}

/// Cron-driven runs. Overlapping triggers are skipped while a run is active.
pub async fn build_scheduler(
    reconciler: Arc<Reconciler>,
    gate: StoreGate,
    cron: &str,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let active = Arc::new(Mutex::new(()));
    let job = Job::new_async(cron, move |_uuid, _l| {
        let reconciler = reconciler.clone();
        let gate = gate.clone();
        let active = active.clone();
        Box::pin(async move {
            let Ok(_guard) = active.try_lock() else {
                warn!("previous reconcile run still active; skipping trigger");
                return;
            };
            reconciler.run_once(&gate).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub fn error_sink_for(config: &ReconConfig) -> Arc<dyn ErrorSink> {
    match &config.error_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(NoopSink),
    }
}

pub async fn reconciler_from_config(config: &ReconConfig) -> Result<Reconciler> {
    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    let helpdesk = ZendeskClient::new(config.helpdesk_config()?)?;
    Ok(Reconciler::new(
        config.job_settings(),
        Arc::new(store),
        Arc::new(helpdesk),
        error_sink_for(config),
    ))
}

pub async fn run_once_from_env(requested_store_id: Option<String>) -> Result<RunSummary> {
    let config = ReconConfig::from_env();
    let gate = StoreGate::new(config.store_id.clone(), requested_store_id);
    if !gate.accepts() {
        let now = Utc::now();
        info!(configured = ?gate.configured, requested = ?gate.requested, "store not accepted; skipping run");
        return Ok(RunSummary {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            skipped: true,
            steps: Vec::new(),
        });
    }
    let reconciler = reconciler_from_config(&config).await?;
    Ok(reconciler.run_once(&gate).await)
}

pub async fn scheduler_from_env() -> Result<Option<JobScheduler>> {
    let config = ReconConfig::from_env();
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let gate = StoreGate::new(config.store_id.clone(), None);
    let reconciler = Arc::new(reconciler_from_config(&config).await?);
    build_scheduler(reconciler, gate, &config.cron).await.map(Some)
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::Arc;

    use advrecon_core::{Ticket, TicketItem, TicketStatus};
    use advrecon_helpdesk::RecordingHelpdesk;
    use advrecon_storage::{MemoryState, MemoryStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::{ErrorSink, FailureReport, FailureReporter, JobEnv, JobSettings};

    #[derive(Default)]
    pub struct RecordingSink {
        reports: Mutex<Vec<FailureReport>>,
    }

    impl RecordingSink {
        pub async fn reports(&self) -> Vec<FailureReport> {
            self.reports.lock().await.clone()
        }
    }

    #[async_trait]
    impl ErrorSink for RecordingSink {
        async fn capture(&self, report: &FailureReport) -> Result<()> {
            self.reports.lock().await.push(report.clone());
            Ok(())
        }
    }

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    pub fn ticket(id: i64, status: TicketStatus, tags: &[&str]) -> Ticket {
        Ticket {
            id,
            store_id: Some("AMAZ".into()),
            subject: "LowSpend-Check".into(),
            payload: r#"{"id": 0}"#.into(),
            status,
            parent_title: None,
            metrics_json: None,
            status_changed_at: Some(now() - Duration::days(30)),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: now() - Duration::days(30),
            items: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn item(ticket_id: i64, parent: Option<&str>, key: &str, metrics: Option<&str>) -> TicketItem {
        TicketItem {
            id: ticket_id * 100,
            ticket_id,
            parent_title: parent.map(str::to_string),
            vendor_id: Some("V1".into()),
            item_key: key.into(),
            metrics_json: metrics.map(str::to_string),
        }
    }

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub helpdesk: Arc<RecordingHelpdesk>,
        pub sink: Arc<RecordingSink>,
    }

    impl Harness {
        pub fn new(state: MemoryState) -> Self {
            Self::with_helpdesk(state, RecordingHelpdesk::new())
        }

        pub fn with_helpdesk(state: MemoryState, helpdesk: RecordingHelpdesk) -> Self {
            Self {
                store: Arc::new(MemoryStore::new(state)),
                helpdesk: Arc::new(helpdesk),
                sink: Arc::new(RecordingSink::default()),
            }
        }
    }

    pub fn env_for(harness: &Harness) -> JobEnv<'_> {
        JobEnv {
            store: harness.store.as_ref(),
            helpdesk: harness.helpdesk.as_ref(),
            reporter: FailureReporter::new(Uuid::new_v4(), harness.sink.clone()),
            settings: JobSettings::default(),
            now: now(),
        }
    }
}
