//! Core domain model and metrics evaluation for the advertising ticket reconciler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "advrecon-core";

/// Tag carried by every advertising ticket.
pub const ADV_ITEM_TAG: &str = "adv_item";
/// Tag carried by keyword-improvement task tickets.
pub const KEYWORD_TASK_TAG: &str = "adv_task_improve_keywords";
/// Store identifier a run must be gated on.
pub const ACCEPTED_STORE_ID: &str = "AMAZ";
/// Inventory spend columns hold a 14 day total.
pub const SPEND_WINDOW_DAYS: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Solved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Solved => "solved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "solved" => Ok(TicketStatus::Solved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(PayloadError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unknown ticket status {0:?}")]
    UnknownStatus(String),
    #[error("ticket payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local mirror of a helpdesk ticket together with its items and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub store_id: Option<String>,
    pub subject: String,
    /// Raw platform payload as mirrored into `ticket_json`.
    pub payload: String,
    pub status: TicketStatus,
    /// Ticket-level entity key, only populated for generic tickets.
    pub parent_title: Option<String>,
    /// Ticket-level metrics blob, only populated for generic tickets.
    pub metrics_json: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<TicketItem>,
    pub tags: Vec<String>,
}

impl Ticket {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// True when the mirrored payload already embeds a satisfaction rating id.
    pub fn has_satisfaction_rating(&self) -> Result<bool, PayloadError> {
        if self.payload.trim().is_empty() {
            return Ok(false);
        }
        let value: JsonValue = serde_json::from_str(&self.payload)?;
        Ok(value
            .pointer("/satisfaction_rating/id")
            .is_some_and(|id| !id.is_null()))
    }

    /// The recorded rating when its follow-up ticket is still outstanding.
    pub fn pending_follow_up(&self) -> Result<Option<SatisfactionRating>, PayloadError> {
        if self.payload.trim().is_empty() {
            return Ok(None);
        }
        let value: JsonValue = serde_json::from_str(&self.payload)?;
        let Some(rating) = value.get("satisfaction_rating") else {
            return Ok(None);
        };
        let pending = rating
            .get("follow_up_pending")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if !pending {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(rating.clone())?))
    }

    pub fn ticket_type(&self) -> &str {
        ticket_type_from_subject(&self.subject)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketItem {
    pub id: i64,
    pub ticket_id: i64,
    pub parent_title: Option<String>,
    pub vendor_id: Option<String>,
    pub item_key: String,
    pub metrics_json: Option<String>,
}

impl TicketItem {
    pub fn has_blank_entity(&self) -> bool {
        self.parent_title
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(true)
    }
}

/// Derive the ticket type label from a subject such as `"Escalation-Billing-Refund"`.
pub fn ticket_type_from_subject(subject: &str) -> &str {
    let mut words = subject.split('-');
    let first = words.next().unwrap_or_default();
    if first.starts_with("Escalation") {
        return words.next().unwrap_or(first);
    }
    first
}

/// Inventory row as far as this system reads and writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InventoryRow {
    pub parent_title: String,
    pub store_id: Option<String>,
    pub vendor_id: Option<String>,
    pub ad_spend: Option<f64>,
    pub ad_sales: Option<f64>,
    pub percent_time_in_budget: Option<f64>,
    pub advert_tickets: Option<String>,
    pub keyword_tickets: Option<String>,
}

/// Inventory columns this system overwrites with ticket summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationField {
    AdvertTickets,
    KeywordTickets,
}

impl AnnotationField {
    pub fn column(&self) -> &'static str {
        match self {
            AnnotationField::AdvertTickets => "zendesk_advert_tickets",
            AnnotationField::KeywordTickets => "zendesk_adv_kw_tickets",
        }
    }
}

/// Aggregated current metrics for one (entity, store) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InventoryMetrics {
    pub rows: i64,
    pub spend_total: f64,
    pub sales_total: f64,
    pub max_time_in_budget: Option<f64>,
}

impl InventoryMetrics {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a InventoryRow>) -> Option<Self> {
        let mut metrics = InventoryMetrics::default();
        for row in rows {
            metrics.rows += 1;
            metrics.spend_total += row.ad_spend.unwrap_or(0.0);
            metrics.sales_total += row.ad_sales.unwrap_or(0.0);
            if let Some(tib) = row.percent_time_in_budget {
                metrics.max_time_in_budget =
                    Some(metrics.max_time_in_budget.map_or(tib, |m| m.max(tib)));
            }
        }
        (metrics.rows > 0).then_some(metrics)
    }

    pub fn avg_daily_spend(&self) -> f64 {
        self.spend_total / SPEND_WINDOW_DAYS
    }

    /// Spend over sales as a percentage; undefined without sales.
    pub fn acos(&self) -> Option<f64> {
        (self.sales_total != 0.0).then(|| self.spend_total / self.sales_total * 100.0)
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        let mut map = serde_json::Map::new();
        map.insert("inv_rows".into(), self.rows.into());
        map.insert("avg_daily_spend".into(), round_to(self.avg_daily_spend(), 2).into());
        map.insert("ad_sales_total".into(), round_to(self.sales_total, 2).into());
        map.insert(
            "time_in_budget".into(),
            self.max_time_in_budget.map(|v| round_to(v, 1)).into(),
        );
        map.insert("acos".into(), self.acos().map(|v| round_to(v, 1)).into());
        map
    }
}

// ---------------------------------------------------------------------------
// Metrics evaluator
// ---------------------------------------------------------------------------

/// Spend must grow by at least 14%.
pub fn evaluate_spend(old_avg_daily_spend: f64, new_avg_daily_spend: f64) -> bool {
    new_avg_daily_spend > old_avg_daily_spend * 1.14
}

/// Time out of budget must shrink by at least 17%.
pub fn evaluate_out_of_budget(old_out_of_budget: f64, new_out_of_budget: f64) -> bool {
    new_out_of_budget < old_out_of_budget * 0.83
}

pub fn evaluate_time_in_budget(old_time_in_budget: f64, new_time_in_budget: f64) -> bool {
    evaluate_out_of_budget(100.0 - old_time_in_budget, 100.0 - new_time_in_budget)
}

/// Sliding-scale ACOS improvement; lower is better and the bar tightens as the
/// starting ACOS gets more extreme.
pub fn evaluate_acos(old_acos: f64, new_acos: f64) -> bool {
    new_acos < old_acos * acos_factor(old_acos)
}

fn acos_factor(old_acos: f64) -> f64 {
    if old_acos >= 70.0 {
        0.80
    } else if old_acos >= 50.0 {
        0.75
    } else if old_acos >= 40.0 {
        0.875
    } else {
        0.90
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// What to do when the current metric is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroMetricPolicy {
    /// Treat zero like a missing metric and skip the ticket.
    #[default]
    Skip,
    /// Evaluate zero as a real observation.
    Evaluate,
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("no metrics captured for {0}")]
    Missing(&'static str),
    #[error("malformed {category} metrics: {source}")]
    Malformed {
        category: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(v) => Ok(v),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        Some(JsonValue::String(s)) => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Metrics captured when a low-spend ticket was opened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpendBaseline {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub parenttitle: Option<String>,
    #[serde(rename = "Avg_Spend_Last_14_Days", deserialize_with = "lenient_f64")]
    pub avg_spend_last_14_days: f64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub buyer: Option<String>,
}

/// Metrics captured when an out-of-budget ticket was opened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BudgetBaseline {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub parenttitle: Option<String>,
    #[serde(rename = "Time_in_Budget", deserialize_with = "lenient_f64")]
    pub time_in_budget: f64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub buyer: Option<String>,
}

/// Metrics captured when a high-ACOS ticket was opened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcosBaseline {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub parenttitle: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub storeid: Option<String>,
    #[serde(rename = "ACOS", deserialize_with = "lenient_f64")]
    pub acos: f64,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    Spend(SpendBaseline),
    Budget(BudgetBaseline),
    Acos(AcosBaseline),
}

impl Baseline {
    pub fn parent_title(&self) -> Option<&str> {
        let title = match self {
            Baseline::Spend(b) => b.parenttitle.as_deref(),
            Baseline::Budget(b) => b.parenttitle.as_deref(),
            Baseline::Acos(b) => b.parenttitle.as_deref(),
        };
        title.filter(|t| !t.trim().is_empty())
    }

    pub fn store_id(&self) -> Option<&str> {
        match self {
            Baseline::Acos(b) => b.storeid.as_deref().filter(|s| !s.trim().is_empty()),
            _ => None,
        }
    }

    pub fn buyer(&self) -> Option<&str> {
        match self {
            Baseline::Spend(b) => b.buyer.as_deref(),
            Baseline::Budget(b) => b.buyer.as_deref(),
            Baseline::Acos(b) => b.buyer.as_deref(),
        }
    }

    /// Compare the baseline against current metrics. `None` means the entity is
    /// not evaluable yet.
    pub fn observe(&self, current: &InventoryMetrics, policy: ZeroMetricPolicy) -> Option<Observation> {
        if current.rows == 0 {
            return None;
        }
        match self {
            Baseline::Spend(b) => {
                let new = current.avg_daily_spend();
                if new == 0.0 && policy == ZeroMetricPolicy::Skip {
                    return None;
                }
                let old = b.avg_spend_last_14_days;
                Some(Observation {
                    old,
                    new,
                    success: evaluate_spend(old, new),
                    comment: format!(
                        "New Avg Spend = ${:.2}; Prior spend was ${:.2}",
                        round_to(new, 2),
                        round_to(old, 2)
                    ),
                })
            }
            Baseline::Budget(b) => {
                let new_tib = current.max_time_in_budget?;
                if new_tib == 0.0 && policy == ZeroMetricPolicy::Skip {
                    return None;
                }
                let old = round_to(100.0 - b.time_in_budget, 1);
                let new = round_to(100.0 - new_tib, 1);
                Some(Observation {
                    old,
                    new,
                    success: evaluate_out_of_budget(old, new),
                    comment: format!(
                        "Previous Time Out Of Budget = {old:.1}%; Since solved = {new:.1}%"
                    ),
                })
            }
            Baseline::Acos(b) => {
                let old = round_to(b.acos, 0);
                let Some(acos) = current.acos() else {
                    // Spend without sales is unbounded ACOS; nothing spent is no signal.
                    if current.spend_total <= 0.0 {
                        return None;
                    }
                    return Some(Observation {
                        old,
                        new: f64::INFINITY,
                        success: false,
                        comment: format!("Previous ACOS = {old:.0}%, since solved - no sales"),
                    });
                };
                let new = round_to(acos, 0);
                Some(Observation {
                    old,
                    new,
                    success: evaluate_acos(old, new),
                    comment: format!("Previous ACOS = {old:.0}%, since solved - {new:.0}%"),
                })
            }
        }
    }
}

/// Outcome of comparing a baseline with current metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub old: f64,
    pub new: f64,
    pub success: bool,
    pub comment: String,
}

impl Observation {
    pub fn score(&self) -> RatingScore {
        if self.success {
            RatingScore::Good
        } else {
            RatingScore::Bad
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricScope {
    Item,
    Ticket,
}

/// Satisfaction categories, each with its own selection filter and metric rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    LowSpend,
    OutOfBudget,
    HighAcos,
    GenericHighAcos,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::LowSpend,
        Category::OutOfBudget,
        Category::HighAcos,
        Category::GenericHighAcos,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::LowSpend => "low_spend",
            Category::OutOfBudget => "out_of_budget",
            Category::HighAcos => "high_acos",
            Category::GenericHighAcos => "generic_high_acos",
        }
    }

    pub fn required_tag(&self) -> Option<&'static str> {
        match self {
            Category::GenericHighAcos => None,
            _ => Some(ADV_ITEM_TAG),
        }
    }

    /// Case-insensitive fragment an item key must contain.
    pub fn item_key_fragment(&self) -> &'static str {
        match self {
            Category::LowSpend => "Low Spend",
            Category::OutOfBudget => "Out Of Budge",
            Category::HighAcos | Category::GenericHighAcos => "High ACOS",
        }
    }

    pub fn scope(&self) -> MetricScope {
        match self {
            Category::GenericHighAcos => MetricScope::Ticket,
            _ => MetricScope::Item,
        }
    }

    pub fn requires_item_entity(&self) -> bool {
        matches!(self, Category::OutOfBudget)
    }

    pub fn matches_item(&self, item: &TicketItem) -> bool {
        let key_matches = item
            .item_key
            .to_ascii_lowercase()
            .contains(&self.item_key_fragment().to_ascii_lowercase());
        let metrics_ok = self.scope() == MetricScope::Ticket || item.metrics_json.is_some();
        let entity_ok = !self.requires_item_entity() || !item.has_blank_entity();
        key_matches && metrics_ok && entity_ok
    }

    /// Full selection predicate, shared by in-memory filtering and tests.
    pub fn matches_ticket(&self, ticket: &Ticket, changed_before: DateTime<Utc>) -> bool {
        let status_ok = matches!(ticket.status, TicketStatus::Solved | TicketStatus::Closed);
        let age_ok = ticket
            .status_changed_at
            .is_some_and(|changed| changed < changed_before);
        let tag_ok = self.required_tag().map_or(true, |tag| ticket.has_tag(tag));
        let ticket_metrics_ok =
            self.scope() == MetricScope::Item || ticket.metrics_json.is_some();
        status_ok
            && age_ok
            && tag_ok
            && ticket_metrics_ok
            && ticket.items.iter().any(|item| self.matches_item(item))
    }

    pub fn parse_baseline(&self, raw: Option<&str>) -> Result<Baseline, MetricsError> {
        let raw = raw
            .filter(|r| !r.trim().is_empty())
            .ok_or(MetricsError::Missing(self.name()))?;
        let malformed = |source| MetricsError::Malformed {
            category: self.name(),
            source,
        };
        match self {
            Category::LowSpend => serde_json::from_str(raw).map(Baseline::Spend).map_err(malformed),
            Category::OutOfBudget => {
                serde_json::from_str(raw).map(Baseline::Budget).map_err(malformed)
            }
            Category::HighAcos | Category::GenericHighAcos => {
                serde_json::from_str(raw).map(Baseline::Acos).map_err(malformed)
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingScore {
    Good,
    Bad,
}

impl RatingScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingScore::Good => "good",
            RatingScore::Bad => "bad",
        }
    }
}

/// Satisfaction rating as stored by the platform and embedded into `ticket_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionRating {
    pub id: i64,
    pub score: RatingScore,
    #[serde(default)]
    pub comment: Option<String>,
    /// Set while a bad rating still waits for its follow-up ticket.
    #[serde(default)]
    pub follow_up_pending: bool,
}

// ---------------------------------------------------------------------------
// Candidate refresh
// ---------------------------------------------------------------------------

/// Reporting queries mirrored into the candidate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    LowSpend,
    OutOfBudget,
    HighAcos,
    ZeroSales,
}

const OPEN_TICKET_EXCLUSION: &str = "NOT EXISTS (
        SELECT 1 FROM zendesk_ticket_items i
        JOIN zendesk_tickets t ON t.ticketid = i.ticketid
        WHERE i.parenttitle = inv.parenttitle
          AND t.storeid = inv.storeid
          AND t.status <> 'closed'
    )";

impl QueryType {
    pub const ALL: [QueryType; 4] = [
        QueryType::LowSpend,
        QueryType::OutOfBudget,
        QueryType::HighAcos,
        QueryType::ZeroSales,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueryType::LowSpend => "LowSpend",
            QueryType::OutOfBudget => "OutOfBudget",
            QueryType::HighAcos => "HighAcos",
            QueryType::ZeroSales => "ZeroSales",
        }
    }

    /// Reporting SQL; every query yields at least `parenttitle` and `storeid`.
    pub fn sql(&self) -> String {
        let (select, having) = match self {
            QueryType::LowSpend => (
                "ROUND((SUM(COALESCE(inv.adapispspend, 0)) / 14.0)::numeric, 2)::float8 AS avg_spend_last_14_days",
                "SUM(COALESCE(inv.adapispspend, 0)) / 14.0 < 5 AND SUM(COALESCE(inv.adapispsales, 0)) > 0",
            ),
            QueryType::OutOfBudget => (
                "MAX(COALESCE(inv.percenttimeinbudget, 0))::float8 AS time_in_budget",
                "MAX(COALESCE(inv.percenttimeinbudget, 0)) < 80",
            ),
            QueryType::HighAcos => (
                "ROUND((SUM(COALESCE(inv.adapispspend, 0)) / NULLIF(SUM(COALESCE(inv.adapispsales, 0)), 0) * 100.0)::numeric, 1)::float8 AS acos",
                "SUM(COALESCE(inv.adapispsales, 0)) > 0 AND SUM(COALESCE(inv.adapispspend, 0)) / SUM(COALESCE(inv.adapispsales, 0)) * 100.0 > 35",
            ),
            QueryType::ZeroSales => (
                "SUM(COALESCE(inv.adapispspend, 0))::float8 AS spend_total",
                "SUM(COALESCE(inv.adapispspend, 0)) > 25 AND SUM(COALESCE(inv.adapispsales, 0)) = 0",
            ),
        };
        format!(
            "SELECT inv.parenttitle, inv.storeid, MAX(inv.vendorid) AS vendorid, {select}
FROM ab_inventory_tool inv
WHERE inv.storeid IS NOT NULL
  AND TRIM(COALESCE(inv.parenttitle, '')) <> ''
  AND {OPEN_TICKET_EXCLUSION}
GROUP BY inv.parenttitle, inv.storeid
HAVING {having}
ORDER BY inv.parenttitle"
        )
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Denormalized candidate snapshot, replaced wholesale per query type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub query_type: QueryType,
    pub parent_title: String,
    pub store_id: String,
    pub data: JsonValue,
}

#[derive(Debug, Error)]
pub enum ReportRowError {
    #[error("report row is not a JSON object")]
    NotAnObject,
    #[error("report row is missing {0}")]
    MissingColumn(&'static str),
}

/// One reporting-query row with its entity key columns lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub parent_title: String,
    pub store_id: String,
    pub columns: serde_json::Map<String, JsonValue>,
}

impl ReportRow {
    pub fn from_json(value: JsonValue) -> Result<Self, ReportRowError> {
        let JsonValue::Object(columns) = value else {
            return Err(ReportRowError::NotAnObject);
        };
        let text = |key: &'static str| {
            columns
                .get(key)
                .and_then(|v| match v {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.trim().is_empty())
                .ok_or(ReportRowError::MissingColumn(key))
        };
        let parent_title = text("parenttitle")?;
        let store_id = text("storeid")?;
        Ok(Self {
            parent_title,
            store_id,
            columns,
        })
    }

    pub fn into_candidate(self, query_type: QueryType, metrics: Option<InventoryMetrics>) -> CandidateRow {
        let mut data = self.columns;
        if let Some(metrics) = metrics {
            data.extend(metrics.to_json_map());
        }
        data.insert("QueryType".into(), query_type.name().into());
        CandidateRow {
            query_type,
            parent_title: self.parent_title,
            store_id: self.store_id,
            data: JsonValue::Object(data),
        }
    }
}

/// Format the updated-at stamp used in keyword annotations.
pub fn short_date(ts: DateTime<Utc>) -> String {
    ts.format("%m-%d-%y").to_string()
}

pub fn default_cleanup_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 9, 1).unwrap_or_default()
}
