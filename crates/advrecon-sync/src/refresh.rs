//! Rebuilds the `zendesk_candidates` table from the reporting queries.

use std::fmt;

use advrecon_core::{QueryType, ReportRow};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::JobEnv;

pub const STEP: &str = "refresh_candidates";
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStats {
    pub refreshed_types: usize,
    pub skipped_types: usize,
    pub failed_types: usize,
    pub removed: u64,
    pub inserted: usize,
    pub failed_rows: usize,
}

impl fmt::Display for RefreshStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refreshed_types={} skipped_types={} failed_types={} removed={} inserted={} failed_rows={}",
            self.refreshed_types,
            self.skipped_types,
            self.failed_types,
            self.removed,
            self.inserted,
            self.failed_rows
        )
    }
}

pub async fn refresh_candidates(env: &JobEnv<'_>) -> Result<RefreshStats> {
    let mut stats = RefreshStats::default();
    for query_type in QueryType::ALL {
        if let Err(err) = refresh_query_type(env, query_type, &mut stats).await {
            stats.failed_types += 1;
            env.reporter
                .capture(STEP, format!("query type {query_type}"), &err)
                .await;
        }
    }
    Ok(stats)
}

async fn refresh_query_type(
    env: &JobEnv<'_>,
    query_type: QueryType,
    stats: &mut RefreshStats,
) -> Result<()> {
    let rows = env
        .store
        .report_rows(query_type)
        .await
        .with_context(|| format!("running {query_type} report"))?;
    info!(%query_type, candidates = rows.len(), "found candidates");
    if rows.is_empty() {
        warn!(%query_type, "report returned no rows; keeping previous candidates");
        stats.skipped_types += 1;
        return Ok(());
    }

    stats.removed += env
        .store
        .delete_candidates(query_type)
        .await
        .with_context(|| format!("deleting {query_type} candidates"))?;

    let total = rows.len();
    let mut processed = 0usize;
    for value in rows {
        let label = row_label(&value);
        match insert_candidate(env, query_type, value).await {
            Ok(()) => stats.inserted += 1,
            Err(err) => {
                stats.failed_rows += 1;
                env.reporter
                    .capture(STEP, format!("{query_type} row {label}"), &err)
                    .await;
            }
        }
        processed += 1;
        if processed % PROGRESS_EVERY == 0 {
            info!(%query_type, processed, total, "candidate refresh progress");
        }
    }
    stats.refreshed_types += 1;
    Ok(())
}

async fn insert_candidate(env: &JobEnv<'_>, query_type: QueryType, value: JsonValue) -> Result<()> {
    let row = ReportRow::from_json(value)?;
    let metrics = env
        .store
        .inventory_metrics(&row.parent_title, &row.store_id)
        .await
        .with_context(|| format!("loading inventory metrics for {}", row.parent_title))?;
    let candidate = row.into_candidate(query_type, metrics);
    env.store
        .insert_candidate(&candidate)
        .await
        .context("inserting candidate")
}

fn row_label(value: &JsonValue) -> String {
    match value.get("parenttitle") {
        Some(JsonValue::String(title)) => title.clone(),
        Some(other) => other.to_string(),
        None => "<no parenttitle>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{env_for, Harness};
    use advrecon_core::{CandidateRow, InventoryRow};
    use advrecon_storage::MemoryState;
    use serde_json::json;

    fn stale(query_type: QueryType, parent: &str) -> CandidateRow {
        CandidateRow {
            query_type,
            parent_title: parent.into(),
            store_id: "AMAZ".into(),
            data: json!({"QueryType": query_type.name()}),
        }
    }

    #[tokio::test]
    async fn empty_report_keeps_previous_candidates() {
        let harness = Harness::new(
            MemoryState::default()
                .with_candidate(stale(QueryType::LowSpend, "Old"))
                .with_report(QueryType::HighAcos, vec![json!({"parenttitle": "Widget", "storeid": "AMAZ"})]),
        );

        let stats = refresh_candidates(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.skipped_types, 3);
        assert_eq!(stats.refreshed_types, 1);

        let state = harness.store.snapshot().await;
        assert!(state
            .candidates
            .iter()
            .any(|c| c.query_type == QueryType::LowSpend && c.parent_title == "Old"));
        assert_eq!(
            state.candidates.iter().filter(|c| c.query_type == QueryType::HighAcos).count(),
            1
        );
    }

    #[tokio::test]
    async fn rows_replace_old_candidates_and_merge_metrics() {
        let harness = Harness::new(
            MemoryState::default()
                .with_candidate(stale(QueryType::LowSpend, "Old"))
                .with_inventory(InventoryRow {
                    parent_title: "Widget".into(),
                    store_id: Some("AMAZ".into()),
                    ad_spend: Some(28.0),
                    ad_sales: Some(56.0),
                    ..Default::default()
                })
                .with_report(
                    QueryType::LowSpend,
                    vec![json!({"parenttitle": "Widget", "storeid": "AMAZ", "spend": 1})],
                ),
        );

        let stats = refresh_candidates(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.inserted, 1);

        let state = harness.store.snapshot().await;
        let low_spend: Vec<_> = state
            .candidates
            .iter()
            .filter(|c| c.query_type == QueryType::LowSpend)
            .collect();
        assert_eq!(low_spend.len(), 1);
        assert_eq!(low_spend[0].parent_title, "Widget");
        assert_eq!(low_spend[0].data["QueryType"], "LowSpend");
        assert_eq!(low_spend[0].data["avg_daily_spend"], 2.0);
    }

    #[tokio::test]
    async fn bad_row_is_skipped_and_reported() {
        let harness = Harness::new(MemoryState::default().with_report(
            QueryType::ZeroSales,
            vec![
                json!({"storeid": "AMAZ"}),
                json!({"parenttitle": "Widget", "storeid": "AMAZ"}),
            ],
        ));

        let stats = refresh_candidates(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.failed_rows, 1);
        assert_eq!(stats.inserted, 1);

        let reports = harness.sink.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].context, "ZeroSales row <no parenttitle>");
    }

    #[tokio::test]
    async fn failing_query_type_does_not_stop_the_rest() {
        let harness = Harness::new(
            MemoryState::default()
                .with_failing_report(QueryType::LowSpend)
                .with_report(
                    QueryType::OutOfBudget,
                    vec![json!({"parenttitle": "Widget", "storeid": "AMAZ"})],
                ),
        );

        let stats = refresh_candidates(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.failed_types, 1);
        assert_eq!(stats.refreshed_types, 1);
        assert_eq!(harness.store.snapshot().await.candidates.len(), 1);
        assert_eq!(harness.sink.reports().await[0].context, "query type LowSpend");
    }
}
