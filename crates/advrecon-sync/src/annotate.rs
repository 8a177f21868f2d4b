//! Writes per-entity ticket summaries back onto inventory rows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use advrecon_core::{short_date, AnnotationField, Ticket, ADV_ITEM_TAG, KEYWORD_TASK_TAG};
use advrecon_storage::AnnotationFilter;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::JobEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationVariant {
    Advert,
    Keyword,
}

impl AnnotationVariant {
    pub fn step(&self) -> &'static str {
        match self {
            AnnotationVariant::Advert => "annotate_advert_tickets",
            AnnotationVariant::Keyword => "annotate_keyword_tickets",
        }
    }

    pub fn field(&self) -> AnnotationField {
        match self {
            AnnotationVariant::Advert => AnnotationField::AdvertTickets,
            AnnotationVariant::Keyword => AnnotationField::KeywordTickets,
        }
    }

    pub fn filter(&self) -> AnnotationFilter {
        match self {
            AnnotationVariant::Advert => AnnotationFilter {
                include_tag: ADV_ITEM_TAG,
                exclude_tag: Some(KEYWORD_TASK_TAG),
                exclude_closed: true,
            },
            AnnotationVariant::Keyword => AnnotationFilter {
                include_tag: KEYWORD_TASK_TAG,
                exclude_tag: None,
                exclude_closed: false,
            },
        }
    }

    pub fn line(&self, ticket: &Ticket) -> String {
        match self {
            AnnotationVariant::Advert => {
                format!("{}-{}-{}", ticket.id, ticket.ticket_type(), ticket.status)
            }
            AnnotationVariant::Keyword => format!(
                "{} - {} - {}",
                ticket.id,
                ticket.status,
                short_date(ticket.updated_at)
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationStats {
    pub field: &'static str,
    pub tickets: usize,
    pub cleared: u64,
    pub groups: usize,
    pub rows_written: u64,
    pub without_store: usize,
    pub failed_groups: usize,
}

impl fmt::Display for AnnotationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field={} tickets={} cleared={} groups={} rows_written={} without_store={} failed_groups={}",
            self.field,
            self.tickets,
            self.cleared,
            self.groups,
            self.rows_written,
            self.without_store,
            self.failed_groups
        )
    }
}

/// Summary text per (entity, store), lines ordered by ticket id.
pub fn group_summaries(variant: AnnotationVariant, tickets: &[Ticket]) -> BTreeMap<(String, String), String> {
    let mut groups: BTreeMap<(String, String), Vec<(i64, String)>> = BTreeMap::new();
    for ticket in tickets {
        let Some(store_id) = ticket.store_id.as_deref().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        let parents: BTreeSet<&str> = ticket
            .items
            .iter()
            .filter_map(|item| item.parent_title.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect();
        let line = variant.line(ticket);
        for parent in parents {
            groups
                .entry((parent.to_string(), store_id.to_string()))
                .or_default()
                .push((ticket.id, line.clone()));
        }
    }

    groups
        .into_iter()
        .map(|(key, mut lines)| {
            lines.sort_by_key(|(id, _)| *id);
            let summary = lines
                .into_iter()
                .map(|(_, line)| line)
                .collect::<Vec<_>>()
                .join(", ");
            (key, summary)
        })
        .collect()
}

pub async fn annotate_inventory(env: &JobEnv<'_>, variant: AnnotationVariant) -> Result<AnnotationStats> {
    let field = variant.field();
    let tickets = env
        .store
        .annotation_tickets(&variant.filter())
        .await
        .with_context(|| format!("selecting tickets for {}", field.column()))?;
    if tickets.is_empty() {
        warn!(field = field.column(), "no tickets to annotate");
    }

    let without_store = tickets
        .iter()
        .filter(|t| t.store_id.as_deref().map_or(true, |s| s.trim().is_empty()))
        .count();
    let groups = group_summaries(variant, &tickets);

    let cleared = env
        .store
        .clear_annotations(field)
        .await
        .with_context(|| format!("clearing {}", field.column()))?;
    info!(field = field.column(), cleared, groups = groups.len(), "cleared annotations");

    let mut stats = AnnotationStats {
        field: field.column(),
        tickets: tickets.len(),
        cleared,
        groups: groups.len(),
        rows_written: 0,
        without_store,
        failed_groups: 0,
    };
    for ((parent_title, store_id), summary) in &groups {
        match env
            .store
            .write_annotation(field, parent_title, store_id, summary)
            .await
        {
            Ok(rows) => {
                debug!(%parent_title, %store_id, rows, "annotated inventory rows");
                stats.rows_written += rows;
            }
            Err(err) => {
                stats.failed_groups += 1;
                env.reporter
                    .capture(variant.step(), format!("{parent_title} / {store_id}"), &err)
                    .await;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{env_for, item, ticket, Harness};
    use advrecon_core::{InventoryRow, TicketStatus};
    use advrecon_storage::MemoryState;
    use chrono::{TimeZone, Utc};

    fn inventory(parent: &str, advert: Option<&str>) -> InventoryRow {
        InventoryRow {
            parent_title: parent.into(),
            store_id: Some("AMAZ".into()),
            advert_tickets: advert.map(str::to_string),
            ..Default::default()
        }
    }

    fn advert_ticket(id: i64, subject: &str, status: TicketStatus, parent: &str) -> Ticket {
        let mut t = ticket(id, status, &[ADV_ITEM_TAG]);
        t.subject = subject.into();
        t.items.push(item(id, Some(parent), "Adv Low Spend", None));
        t
    }

    #[test]
    fn advert_lines_are_sorted_by_ticket_id() {
        let tickets = vec![
            advert_ticket(20, "Escalation-Budget-Review", TicketStatus::Open, "Widget"),
            advert_ticket(3, "LowSpend-Check", TicketStatus::Solved, "Widget"),
        ];
        let groups = group_summaries(AnnotationVariant::Advert, &tickets);
        assert_eq!(
            groups.get(&("Widget".to_string(), "AMAZ".to_string())).map(String::as_str),
            Some("3-LowSpend-solved, 20-Budget-open")
        );
    }

    #[test]
    fn keyword_line_uses_short_updated_date() {
        let mut t = ticket(9, TicketStatus::Open, &[KEYWORD_TASK_TAG]);
        t.updated_at = Utc.with_ymd_and_hms(2024, 2, 5, 12, 0, 0).unwrap();
        assert_eq!(AnnotationVariant::Keyword.line(&t), "9 - open - 02-05-24");
    }

    #[test]
    fn tickets_without_store_are_not_grouped() {
        let mut t = advert_ticket(1, "LowSpend-Check", TicketStatus::Open, "Widget");
        t.store_id = None;
        assert!(group_summaries(AnnotationVariant::Advert, &[t]).is_empty());
    }

    #[tokio::test]
    async fn stale_annotations_are_cleared_even_without_tickets() {
        let harness = Harness::new(
            MemoryState::default()
                .with_inventory(inventory("Widget", Some("1-LowSpend-open")))
                .with_inventory(inventory("Gadget", Some("2-LowSpend-open"))),
        );

        let stats = annotate_inventory(&env_for(&harness), AnnotationVariant::Advert)
            .await
            .unwrap();
        assert_eq!(stats.cleared, 2);
        assert_eq!(stats.groups, 0);

        let state = harness.store.snapshot().await;
        assert!(state.inventory.iter().all(|row| row.advert_tickets.is_none()));
    }

    #[tokio::test]
    async fn advert_annotation_skips_keyword_tasks_and_closed_tickets() {
        let mut keyword_task = advert_ticket(2, "LowSpend-Check", TicketStatus::Open, "Widget");
        keyword_task.tags.push(KEYWORD_TASK_TAG.into());
        let harness = Harness::new(
            MemoryState::default()
                .with_ticket(advert_ticket(1, "LowSpend-Check", TicketStatus::Open, "Widget"))
                .with_ticket(keyword_task)
                .with_ticket(advert_ticket(3, "HighAcos-Check", TicketStatus::Closed, "Widget"))
                .with_inventory(inventory("Widget", Some("stale")))
                .with_inventory(inventory("Gadget", Some("stale"))),
        );

        annotate_inventory(&env_for(&harness), AnnotationVariant::Advert)
            .await
            .unwrap();

        let state = harness.store.snapshot().await;
        assert_eq!(
            state.inventory_row("Widget", "AMAZ").and_then(|r| r.advert_tickets.as_deref()),
            Some("1-LowSpend-open")
        );
        assert_eq!(
            state.inventory_row("Gadget", "AMAZ").and_then(|r| r.advert_tickets.as_deref()),
            None
        );
    }
}
