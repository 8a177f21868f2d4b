//! Removes advertising tickets that never resolved to an entity and backfills
//! missing store ids.

use std::fmt;

use advrecon_core::{Ticket, ADV_ITEM_TAG};
use advrecon_helpdesk::DeleteOutcome;
use advrecon_storage::{has_only_blank_entities, CleanupScope};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::JobEnv;

pub const STEP: &str = "cleanup_tickets";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub deleted: usize,
    pub already_gone: usize,
    pub failed_deletes: usize,
    pub backfilled: usize,
    pub unresolved_store: usize,
    pub failed_backfills: usize,
}

impl fmt::Display for CleanupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted={} already_gone={} failed_deletes={} backfilled={} unresolved_store={} failed_backfills={}",
            self.deleted,
            self.already_gone,
            self.failed_deletes,
            self.backfilled,
            self.unresolved_store,
            self.failed_backfills
        )
    }
}

pub async fn cleanup_tickets(env: &JobEnv<'_>) -> Result<CleanupStats> {
    let scope = CleanupScope {
        tag: ADV_ITEM_TAG,
        created_after: env.settings.cleanup_created_after,
    };
    let mut stats = CleanupStats::default();

    // The two passes are independent; a failed query in one still lets the
    // other run.
    if let Err(err) = delete_blank_entity_tickets(env, &scope, &mut stats).await {
        env.reporter.capture(STEP, "blank entity pass", &err).await;
    }
    if let Err(err) = backfill_store_ids(env, &scope, &mut stats).await {
        env.reporter.capture(STEP, "store backfill pass", &err).await;
    }
    Ok(stats)
}

async fn delete_blank_entity_tickets(
    env: &JobEnv<'_>,
    scope: &CleanupScope,
    stats: &mut CleanupStats,
) -> Result<()> {
    let tickets = env
        .store
        .blank_entity_tickets(scope)
        .await
        .context("selecting tickets with blank entity keys")?;
    info!(tickets = tickets.len(), "found tickets with blank entity keys");

    for ticket in tickets.iter().filter(|t| has_only_blank_entities(t)) {
        match delete_ticket(env, ticket).await {
            Ok(DeleteOutcome::Deleted) => stats.deleted += 1,
            Ok(DeleteOutcome::AlreadyGone) => stats.already_gone += 1,
            Err(err) => {
                stats.failed_deletes += 1;
                env.reporter
                    .capture(STEP, format!("delete ticket {}", ticket.id), &err)
                    .await;
            }
        }
    }
    Ok(())
}

/// Remote first: a local delete must never outlive a ticket that still
/// exists on the platform.
async fn delete_ticket(env: &JobEnv<'_>, ticket: &Ticket) -> Result<DeleteOutcome> {
    let outcome = env
        .helpdesk
        .delete_ticket(ticket.id)
        .await
        .with_context(|| format!("deleting ticket {} at the helpdesk", ticket.id))?;
    if outcome == DeleteOutcome::AlreadyGone {
        warn!(ticket_id = ticket.id, "ticket already gone at the helpdesk");
    }
    env.store
        .delete_ticket(ticket.id)
        .await
        .with_context(|| format!("deleting local copy of ticket {}", ticket.id))?;
    info!(ticket_id = ticket.id, "deleted ticket with blank entity keys");
    Ok(outcome)
}

async fn backfill_store_ids(
    env: &JobEnv<'_>,
    scope: &CleanupScope,
    stats: &mut CleanupStats,
) -> Result<()> {
    let tickets = env
        .store
        .tickets_missing_store(scope)
        .await
        .context("selecting tickets without a store id")?;
    info!(tickets = tickets.len(), "found tickets without a store id");

    for ticket in &tickets {
        match backfill_one(env, ticket).await {
            Ok(true) => stats.backfilled += 1,
            Ok(false) => stats.unresolved_store += 1,
            Err(err) => {
                stats.failed_backfills += 1;
                env.reporter
                    .capture(STEP, format!("backfill ticket {}", ticket.id), &err)
                    .await;
            }
        }
    }
    Ok(())
}

async fn backfill_one(env: &JobEnv<'_>, ticket: &Ticket) -> Result<bool> {
    let Some(item) = ticket.items.first() else {
        return Ok(false);
    };
    let (Some(parent_title), Some(vendor_id)) =
        (item.parent_title.as_deref(), item.vendor_id.as_deref())
    else {
        return Ok(false);
    };
    let Some(store_id) = env
        .store
        .inventory_store_for(parent_title, vendor_id)
        .await
        .with_context(|| format!("looking up store for {parent_title}"))?
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(false);
    };
    env.store
        .set_ticket_store(ticket.id, &store_id)
        .await
        .with_context(|| format!("setting store on ticket {}", ticket.id))?;
    info!(ticket_id = ticket.id, %store_id, "backfilled store id");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{env_for, item, ticket, Harness};
    use advrecon_core::{InventoryRow, TicketStatus};
    use advrecon_helpdesk::{HelpdeskCall, RecordingHelpdesk};
    use advrecon_storage::MemoryState;
    use chrono::{TimeZone, Utc};

    fn adv_ticket(id: i64, parents: &[Option<&str>]) -> Ticket {
        let mut t = ticket(id, TicketStatus::Open, &[ADV_ITEM_TAG]);
        for parent in parents {
            t.items.push(item(id, *parent, "Adv Low Spend", None));
        }
        t
    }

    #[tokio::test]
    async fn deletes_only_tickets_whose_items_are_all_blank() {
        let harness = Harness::new(
            MemoryState::default()
                .with_ticket(adv_ticket(1, &[None, Some("  ")]))
                .with_ticket(adv_ticket(2, &[None, Some("Widget")]))
                .with_ticket(adv_ticket(3, &[Some("Widget")])),
        );

        let stats = cleanup_tickets(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.deleted, 1);

        let state = harness.store.snapshot().await;
        assert!(state.ticket(1).is_none());
        assert!(state.ticket(2).is_some());
        assert!(state.ticket(3).is_some());
        assert_eq!(harness.helpdesk.calls().await, vec![HelpdeskCall::Delete(1)]);
    }

    #[tokio::test]
    async fn old_tickets_are_out_of_scope() {
        let mut old = adv_ticket(1, &[None]);
        old.created_at = Utc.with_ymd_and_hms(2023, 8, 1, 0, 0, 0).unwrap();
        let harness = Harness::new(MemoryState::default().with_ticket(old));

        let stats = cleanup_tickets(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.deleted, 0);
        assert!(harness.store.snapshot().await.ticket(1).is_some());
    }

    #[tokio::test]
    async fn failed_remote_delete_leaves_local_ticket() {
        let harness = Harness::with_helpdesk(
            MemoryState::default()
                .with_ticket(adv_ticket(1, &[None]))
                .with_ticket(adv_ticket(2, &[None])),
            RecordingHelpdesk::failing_deletes([1]),
        );

        let stats = cleanup_tickets(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.failed_deletes, 1);
        assert_eq!(stats.deleted, 1);

        let state = harness.store.snapshot().await;
        assert!(state.ticket(1).is_some());
        assert!(state.ticket(2).is_none());
        assert_eq!(harness.sink.reports().await[0].context, "delete ticket 1");
    }

    #[tokio::test]
    async fn missing_store_is_backfilled_from_inventory() {
        let mut orphan = adv_ticket(4, &[Some("Widget")]);
        orphan.store_id = None;
        let mut unknown = adv_ticket(5, &[Some("Unlisted")]);
        unknown.store_id = None;
        let harness = Harness::new(
            MemoryState::default()
                .with_ticket(orphan)
                .with_ticket(unknown)
                .with_inventory(InventoryRow {
                    parent_title: "Widget".into(),
                    store_id: Some("AMAZ".into()),
                    vendor_id: Some("V1".into()),
                    ..Default::default()
                }),
        );

        let stats = cleanup_tickets(&env_for(&harness)).await.unwrap();
        assert_eq!(stats.backfilled, 1);
        assert_eq!(stats.unresolved_store, 1);

        let state = harness.store.snapshot().await;
        assert_eq!(state.ticket(4).and_then(|t| t.store_id.as_deref()), Some("AMAZ"));
        assert_eq!(state.ticket(5).and_then(|t| t.store_id.as_deref()), None);
    }
}
