//! Ticket, inventory and candidate persistence for the reconciler.
//!
//! `ReconStore` is the seam the jobs talk to. `PgStore` issues the real
//! queries against the externally owned schema; `MemoryStore` keeps the same
//! tables in memory for tests and local dry runs.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use advrecon_core::{
    AnnotationField, CandidateRow, Category, InventoryMetrics, InventoryRow, MetricScope,
    QueryType, SatisfactionRating, Ticket, TicketItem, TicketStatus,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "advrecon-storage";

/// Which tickets feed an inventory annotation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationFilter {
    pub include_tag: &'static str,
    pub exclude_tag: Option<&'static str>,
    pub exclude_closed: bool,
}

impl AnnotationFilter {
    pub fn matches(&self, ticket: &Ticket) -> bool {
        ticket.has_tag(self.include_tag)
            && self.exclude_tag.map_or(true, |tag| !ticket.has_tag(tag))
            && !(self.exclude_closed && ticket.status == TicketStatus::Closed)
            && ticket.items.iter().any(|item| item.parent_title.is_some())
    }
}

/// Tickets considered by the cleanup passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupScope {
    pub tag: &'static str,
    pub created_after: DateTime<Utc>,
}

impl CleanupScope {
    pub fn contains(&self, ticket: &Ticket) -> bool {
        ticket.has_tag(self.tag) && ticket.created_at > self.created_after
    }
}

/// Every ticket item has a blank entity key, and there is at least one item.
pub fn has_only_blank_entities(ticket: &Ticket) -> bool {
    !ticket.items.is_empty() && ticket.items.iter().all(TicketItem::has_blank_entity)
}

#[async_trait]
pub trait ReconStore: Send + Sync {
    /// Solved/closed tickets old enough to be rated for `category`.
    async fn rating_candidates(
        &self,
        category: Category,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>>;

    /// Current metrics for an entity in a store; `None` when no inventory row matches.
    async fn inventory_metrics(
        &self,
        parent_title: &str,
        store_id: &str,
    ) -> Result<Option<InventoryMetrics>>;

    /// Embed a satisfaction rating into the mirrored ticket payload.
    async fn record_rating(&self, ticket_id: i64, rating: &SatisfactionRating) -> Result<()>;

    async fn report_rows(&self, query_type: QueryType) -> Result<Vec<JsonValue>>;

    async fn delete_candidates(&self, query_type: QueryType) -> Result<u64>;

    async fn insert_candidate(&self, candidate: &CandidateRow) -> Result<()>;

    async fn annotation_tickets(&self, filter: &AnnotationFilter) -> Result<Vec<Ticket>>;

    async fn clear_annotations(&self, field: AnnotationField) -> Result<u64>;

    async fn write_annotation(
        &self,
        field: AnnotationField,
        parent_title: &str,
        store_id: &str,
        summary: &str,
    ) -> Result<u64>;

    /// Tickets in scope whose items all lack an entity key.
    async fn blank_entity_tickets(&self, scope: &CleanupScope) -> Result<Vec<Ticket>>;

    /// Remove a ticket with its items and tags.
    async fn delete_ticket(&self, ticket_id: i64) -> Result<()>;

    async fn tickets_missing_store(&self, scope: &CleanupScope) -> Result<Vec<Ticket>>;

    async fn inventory_store_for(&self, parent_title: &str, vendor_id: &str)
        -> Result<Option<String>>;

    async fn set_ticket_store(&self, ticket_id: i64, store_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

const TICKET_COLUMNS: &str = "t.ticketid, t.storeid, t.subject, t.ticket_json, t.status, \
     t.parenttitle, t.additional_data_json, \
     t.status_change_date::timestamptz AS status_change_date, \
     t.created_at::timestamptz AS created_at, \
     t.updated_at::timestamptz AS updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TicketDbRow {
    ticketid: i64,
    storeid: Option<String>,
    subject: Option<String>,
    ticket_json: Option<String>,
    status: String,
    parenttitle: Option<String>,
    additional_data_json: Option<String>,
    status_change_date: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemDbRow {
    id: i64,
    ticketid: i64,
    parenttitle: Option<String>,
    vendorid: Option<String>,
    item_key: Option<String>,
    additional_data_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn hydrate(&self, rows: Vec<TicketDbRow>) -> Result<Vec<Ticket>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.ticketid).collect();

        let items = sqlx::query_as::<_, ItemDbRow>(
            "SELECT id, ticketid, parenttitle, vendorid, item_key, additional_data_json
             FROM zendesk_ticket_items
             WHERE ticketid = ANY($1)
             ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("loading ticket items")?;

        let tags = sqlx::query_as::<_, (i64, String)>(
            "SELECT ticketid, tag FROM zendesk_ticket_tags WHERE ticketid = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .context("loading ticket tags")?;

        let mut items_by_ticket: HashMap<i64, Vec<TicketItem>> = HashMap::new();
        for item in items {
            items_by_ticket.entry(item.ticketid).or_default().push(TicketItem {
                id: item.id,
                ticket_id: item.ticketid,
                parent_title: item.parenttitle,
                vendor_id: item.vendorid,
                item_key: item.item_key.unwrap_or_default(),
                metrics_json: item.additional_data_json,
            });
        }
        let mut tags_by_ticket: HashMap<i64, Vec<String>> = HashMap::new();
        for (ticket_id, tag) in tags {
            tags_by_ticket.entry(ticket_id).or_default().push(tag);
        }

        rows.into_iter()
            .map(|row| {
                let status: TicketStatus = row
                    .status
                    .parse()
                    .with_context(|| format!("ticket {} status", row.ticketid))?;
                let created_at = row.created_at.unwrap_or_default();
                Ok(Ticket {
                    id: row.ticketid,
                    store_id: row.storeid,
                    subject: row.subject.unwrap_or_default(),
                    payload: row.ticket_json.unwrap_or_default(),
                    status,
                    parent_title: row.parenttitle,
                    metrics_json: row.additional_data_json,
                    status_changed_at: row.status_change_date,
                    created_at,
                    updated_at: row.updated_at.unwrap_or(created_at),
                    items: items_by_ticket.remove(&row.ticketid).unwrap_or_default(),
                    tags: tags_by_ticket.remove(&row.ticketid).unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ReconStore for PgStore {
    async fn rating_candidates(
        &self,
        category: Category,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS}
             FROM zendesk_tickets t
             WHERE t.status IN ('solved', 'closed')
               AND t.status_change_date < $1
               AND ($2::text IS NULL OR EXISTS (
                   SELECT 1 FROM zendesk_ticket_tags g
                   WHERE g.ticketid = t.ticketid AND g.tag = $2))
               AND (NOT $4 OR t.additional_data_json IS NOT NULL)
               AND EXISTS (
                   SELECT 1 FROM zendesk_ticket_items i
                   WHERE i.ticketid = t.ticketid
                     AND i.item_key ILIKE $3
                     AND ($4 OR i.additional_data_json IS NOT NULL)
                     AND (NOT $5 OR TRIM(COALESCE(i.parenttitle, '')) <> ''))
             ORDER BY t.ticketid"
        );
        let rows = sqlx::query_as::<_, TicketDbRow>(&sql)
            .bind(changed_before)
            .bind(category.required_tag())
            .bind(format!("%{}%", category.item_key_fragment()))
            .bind(category.scope() == MetricScope::Ticket)
            .bind(category.requires_item_entity())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("selecting {category} rating candidates"))?;
        self.hydrate(rows).await
    }

    async fn inventory_metrics(
        &self,
        parent_title: &str,
        store_id: &str,
    ) -> Result<Option<InventoryMetrics>> {
        let (rows, spend_total, sales_total, max_time_in_budget) =
            sqlx::query_as::<_, (i64, f64, f64, Option<f64>)>(
                "SELECT COUNT(*) AS row_count,
                        COALESCE(SUM(COALESCE(adapispspend, 0)), 0)::float8 AS spend_total,
                        COALESCE(SUM(COALESCE(adapispsales, 0)), 0)::float8 AS sales_total,
                        MAX(percenttimeinbudget)::float8 AS max_time_in_budget
                 FROM ab_inventory_tool
                 WHERE parenttitle = $1 AND storeid = $2",
            )
            .bind(parent_title)
            .bind(store_id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("loading inventory metrics for {parent_title}/{store_id}"))?;

        Ok((rows > 0).then_some(InventoryMetrics {
            rows,
            spend_total,
            sales_total,
            max_time_in_budget,
        }))
    }

    async fn record_rating(&self, ticket_id: i64, rating: &SatisfactionRating) -> Result<()> {
        let value = serde_json::to_value(rating).context("serializing satisfaction rating")?;
        sqlx::query(
            "UPDATE zendesk_tickets
             SET ticket_json = jsonb_set(
                     COALESCE(NULLIF(TRIM(ticket_json), '')::jsonb, '{}'::jsonb),
                     '{satisfaction_rating}',
                     $2::jsonb
                 )::text
             WHERE ticketid = $1",
        )
        .bind(ticket_id)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording rating on ticket {ticket_id}"))?;
        Ok(())
    }

    async fn report_rows(&self, query_type: QueryType) -> Result<Vec<JsonValue>> {
        let sql = format!(
            "SELECT row_to_json(q)::jsonb AS row FROM ({}) q",
            query_type.sql()
        );
        sqlx::query_scalar::<_, JsonValue>(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("running {query_type} report query"))
    }

    async fn delete_candidates(&self, query_type: QueryType) -> Result<u64> {
        let result = sqlx::query("DELETE FROM zendesk_candidates WHERE querytype = $1")
            .bind(query_type.name())
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting {query_type} candidates"))?;
        Ok(result.rows_affected())
    }

    async fn insert_candidate(&self, candidate: &CandidateRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO zendesk_candidates (querytype, parenttitle, storeid, data, created_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(candidate.query_type.name())
        .bind(&candidate.parent_title)
        .bind(&candidate.store_id)
        .bind(&candidate.data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting candidate {}", candidate.parent_title))?;
        Ok(())
    }

    async fn annotation_tickets(&self, filter: &AnnotationFilter) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS}
             FROM zendesk_tickets t
             WHERE EXISTS (
                   SELECT 1 FROM zendesk_ticket_tags g
                   WHERE g.ticketid = t.ticketid AND g.tag = $1)
               AND ($2::text IS NULL OR NOT EXISTS (
                   SELECT 1 FROM zendesk_ticket_tags g
                   WHERE g.ticketid = t.ticketid AND g.tag = $2))
               AND (NOT $3 OR t.status <> 'closed')
               AND EXISTS (
                   SELECT 1 FROM zendesk_ticket_items i
                   WHERE i.ticketid = t.ticketid AND i.parenttitle IS NOT NULL)
             ORDER BY t.ticketid"
        );
        let rows = sqlx::query_as::<_, TicketDbRow>(&sql)
            .bind(filter.include_tag)
            .bind(filter.exclude_tag)
            .bind(filter.exclude_closed)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("selecting {} tickets for annotation", filter.include_tag))?;
        self.hydrate(rows).await
    }

    async fn clear_annotations(&self, field: AnnotationField) -> Result<u64> {
        let column = field.column();
        let sql = format!("UPDATE ab_inventory_tool SET {column} = NULL WHERE {column} IS NOT NULL");
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("clearing {column}"))?;
        Ok(result.rows_affected())
    }

    async fn write_annotation(
        &self,
        field: AnnotationField,
        parent_title: &str,
        store_id: &str,
        summary: &str,
    ) -> Result<u64> {
        let column = field.column();
        let sql = format!(
            "UPDATE ab_inventory_tool SET {column} = $1 WHERE parenttitle = $2 AND storeid = $3"
        );
        let result = sqlx::query(&sql)
            .bind(summary)
            .bind(parent_title)
            .bind(store_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("writing {column} for {parent_title}/{store_id}"))?;
        Ok(result.rows_affected())
    }

    async fn blank_entity_tickets(&self, scope: &CleanupScope) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS}
             FROM zendesk_tickets t
             WHERE EXISTS (
                   SELECT 1 FROM zendesk_ticket_tags g
                   WHERE g.ticketid = t.ticketid AND g.tag = $1)
               AND t.created_at > $2
               AND EXISTS (
                   SELECT 1 FROM zendesk_ticket_items i
                   WHERE i.ticketid = t.ticketid AND TRIM(COALESCE(i.parenttitle, '')) = '')
               AND NOT EXISTS (
                   SELECT 1 FROM zendesk_ticket_items i
                   WHERE i.ticketid = t.ticketid AND TRIM(COALESCE(i.parenttitle, '')) <> '')
             ORDER BY t.ticketid"
        );
        let rows = sqlx::query_as::<_, TicketDbRow>(&sql)
            .bind(scope.tag)
            .bind(scope.created_after)
            .fetch_all(&self.pool)
            .await
            .context("selecting tickets with blank entity keys")?;
        self.hydrate(rows).await
    }

    async fn delete_ticket(&self, ticket_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.context("opening delete transaction")?;
        for sql in [
            "DELETE FROM zendesk_ticket_items WHERE ticketid = $1",
            "DELETE FROM zendesk_ticket_tags WHERE ticketid = $1",
            "DELETE FROM zendesk_tickets WHERE ticketid = $1",
        ] {
            sqlx::query(sql)
                .bind(ticket_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("deleting ticket {ticket_id}"))?;
        }
        tx.commit()
            .await
            .with_context(|| format!("committing delete of ticket {ticket_id}"))
    }

    async fn tickets_missing_store(&self, scope: &CleanupScope) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS}
             FROM zendesk_tickets t
             WHERE EXISTS (
                   SELECT 1 FROM zendesk_ticket_tags g
                   WHERE g.ticketid = t.ticketid AND g.tag = $1)
               AND t.storeid IS NULL
               AND t.created_at > $2
             ORDER BY t.ticketid"
        );
        let rows = sqlx::query_as::<_, TicketDbRow>(&sql)
            .bind(scope.tag)
            .bind(scope.created_after)
            .fetch_all(&self.pool)
            .await
            .context("selecting tickets without a store id")?;
        self.hydrate(rows).await
    }

    async fn inventory_store_for(
        &self,
        parent_title: &str,
        vendor_id: &str,
    ) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT storeid FROM ab_inventory_tool
             WHERE parenttitle = $1 AND vendorid = $2 AND TRIM(COALESCE(storeid, '')) <> ''
             LIMIT 1",
        )
        .bind(parent_title)
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("looking up store for {parent_title}/{vendor_id}"))
    }

    async fn set_ticket_store(&self, ticket_id: i64, store_id: &str) -> Result<()> {
        sqlx::query("UPDATE zendesk_tickets SET storeid = $2 WHERE ticketid = $1 AND storeid IS NULL")
            .bind(ticket_id)
            .bind(store_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("backfilling store on ticket {ticket_id}"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Table contents held by [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub tickets: Vec<Ticket>,
    pub inventory: Vec<InventoryRow>,
    pub candidates: Vec<CandidateRow>,
    pub reports: HashMap<QueryType, Vec<JsonValue>>,
    pub failing_reports: HashSet<QueryType>,
}

impl MemoryState {
    pub fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.tickets.push(ticket);
        self
    }

    pub fn with_inventory(mut self, row: InventoryRow) -> Self {
        self.inventory.push(row);
        self
    }

    pub fn with_candidate(mut self, candidate: CandidateRow) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn with_report(mut self, query_type: QueryType, rows: Vec<JsonValue>) -> Self {
        self.reports.insert(query_type, rows);
        self
    }

    pub fn with_failing_report(mut self, query_type: QueryType) -> Self {
        self.failing_reports.insert(query_type);
        self
    }

    pub fn ticket(&self, ticket_id: i64) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == ticket_id)
    }

    pub fn inventory_row(&self, parent_title: &str, store_id: &str) -> Option<&InventoryRow> {
        self.inventory
            .iter()
            .find(|r| r.parent_title == parent_title && r.store_id.as_deref() == Some(store_id))
    }

    fn annotation_slot(row: &mut InventoryRow, field: AnnotationField) -> &mut Option<String> {
        match field {
            AnnotationField::AdvertTickets => &mut row.advert_tickets,
            AnnotationField::KeywordTickets => &mut row.keyword_tickets,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

fn tickets_where(state: &MemoryState, keep: impl Fn(&Ticket) -> bool) -> Vec<Ticket> {
    let mut tickets: Vec<Ticket> = state.tickets.iter().filter(|&t| keep(t)).cloned().collect();
    tickets.sort_by_key(|t| t.id);
    tickets
}

#[async_trait]
impl ReconStore for MemoryStore {
    async fn rating_candidates(
        &self,
        category: Category,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(tickets_where(&state, |t| category.matches_ticket(t, changed_before)))
    }

    async fn inventory_metrics(
        &self,
        parent_title: &str,
        store_id: &str,
    ) -> Result<Option<InventoryMetrics>> {
        let state = self.state.lock().await;
        Ok(InventoryMetrics::from_rows(state.inventory.iter().filter(|r| {
            r.parent_title == parent_title && r.store_id.as_deref() == Some(store_id)
        })))
    }

    async fn record_rating(&self, ticket_id: i64, rating: &SatisfactionRating) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(ticket) = state.tickets.iter_mut().find(|t| t.id == ticket_id) else {
            debug!(ticket_id, "rating recorded for unknown ticket");
            return Ok(());
        };
        let mut payload: JsonValue = if ticket.payload.trim().is_empty() {
            JsonValue::Object(Default::default())
        } else {
            serde_json::from_str(&ticket.payload)
                .with_context(|| format!("parsing payload of ticket {ticket_id}"))?
        };
        let object = payload
            .as_object_mut()
            .ok_or_else(|| anyhow!("payload of ticket {ticket_id} is not an object"))?;
        object.insert(
            "satisfaction_rating".into(),
            serde_json::to_value(rating).context("serializing satisfaction rating")?,
        );
        ticket.payload = payload.to_string();
        Ok(())
    }

    async fn report_rows(&self, query_type: QueryType) -> Result<Vec<JsonValue>> {
        let state = self.state.lock().await;
        if state.failing_reports.contains(&query_type) {
            return Err(anyhow!("report query {query_type} failed"));
        }
        Ok(state.reports.get(&query_type).cloned().unwrap_or_default())
    }

    async fn delete_candidates(&self, query_type: QueryType) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.candidates.len();
        state.candidates.retain(|c| c.query_type != query_type);
        Ok((before - state.candidates.len()) as u64)
    }

    async fn insert_candidate(&self, candidate: &CandidateRow) -> Result<()> {
        self.state.lock().await.candidates.push(candidate.clone());
        Ok(())
    }

    async fn annotation_tickets(&self, filter: &AnnotationFilter) -> Result<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(tickets_where(&state, |t| filter.matches(t)))
    }

    async fn clear_annotations(&self, field: AnnotationField) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut cleared = 0;
        for row in &mut state.inventory {
            if MemoryState::annotation_slot(row, field).take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn write_annotation(
        &self,
        field: AnnotationField,
        parent_title: &str,
        store_id: &str,
        summary: &str,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut written = 0;
        for row in state.inventory.iter_mut().filter(|r| {
            r.parent_title == parent_title && r.store_id.as_deref() == Some(store_id)
        }) {
            *MemoryState::annotation_slot(row, field) = Some(summary.to_string());
            written += 1;
        }
        Ok(written)
    }

    async fn blank_entity_tickets(&self, scope: &CleanupScope) -> Result<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(tickets_where(&state, |t| {
            scope.contains(t) && has_only_blank_entities(t)
        }))
    }

    async fn delete_ticket(&self, ticket_id: i64) -> Result<()> {
        self.state.lock().await.tickets.retain(|t| t.id != ticket_id);
        Ok(())
    }

    async fn tickets_missing_store(&self, scope: &CleanupScope) -> Result<Vec<Ticket>> {
        let state = self.state.lock().await;
        Ok(tickets_where(&state, |t| scope.contains(t) && t.store_id.is_none()))
    }

    async fn inventory_store_for(
        &self,
        parent_title: &str,
        vendor_id: &str,
    ) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .inventory
            .iter()
            .filter(|r| r.parent_title == parent_title && r.vendor_id.as_deref() == Some(vendor_id))
            .filter_map(|r| r.store_id.clone())
            .find(|s| !s.trim().is_empty()))
    }

    async fn set_ticket_store(&self, ticket_id: i64, store_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(ticket) = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id && t.store_id.is_none())
        {
            ticket.store_id = Some(store_id.to_string());
        }
        Ok(())
    }
}
