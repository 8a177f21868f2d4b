//! Satisfaction reconciliation: rate solved advertising tickets by comparing
//! the metrics captured at open time with current inventory aggregates.

use std::fmt;

use advrecon_core::{
    Baseline, Category, MetricScope, Observation, RatingScore, SatisfactionRating, Ticket,
};
use advrecon_helpdesk::{FollowUpTicket, RatingRequest};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::JobEnv;

pub const FOLLOW_UP_TAG: &str = "csat_follow_up";

pub fn step_name(category: Category) -> &'static str {
    match category {
        Category::LowSpend => "csat_low_spend",
        Category::OutOfBudget => "csat_out_of_budget",
        Category::HighAcos => "csat_high_acos",
        Category::GenericHighAcos => "csat_generic_high_acos",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SatisfactionStats {
    pub category: &'static str,
    pub examined: usize,
    pub rated_good: usize,
    pub rated_bad: usize,
    pub follow_ups: usize,
    /// Follow-ups opened for a bad rating recorded by an earlier run.
    pub resumed_follow_ups: usize,
    pub already_rated: usize,
    pub not_evaluable: usize,
    pub bad_items: usize,
    pub failed: usize,
}

impl SatisfactionStats {
    fn new(category: Category) -> Self {
        Self {
            category: category.name(),
            examined: 0,
            rated_good: 0,
            rated_bad: 0,
            follow_ups: 0,
            resumed_follow_ups: 0,
            already_rated: 0,
            not_evaluable: 0,
            bad_items: 0,
            failed: 0,
        }
    }
}

impl fmt::Display for SatisfactionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "category={} examined={} good={} bad={} follow_ups={} resumed_follow_ups={} already_rated={} not_evaluable={} bad_items={} failed={}",
            self.category,
            self.examined,
            self.rated_good,
            self.rated_bad,
            self.follow_ups,
            self.resumed_follow_ups,
            self.already_rated,
            self.not_evaluable,
            self.bad_items,
            self.failed
        )
    }
}

enum TicketOutcome {
    AlreadyRated,
    NotEvaluable,
    Rated { score: RatingScore, follow_up: bool },
    FollowUpResumed,
}

/// A baseline matched with the entity and store it describes.
struct Target {
    baseline: Baseline,
    parent_title: String,
    store_id: String,
}

struct Evaluation {
    target: Target,
    observation: Observation,
}

pub async fn reconcile_satisfaction(env: &JobEnv<'_>, category: Category) -> Result<SatisfactionStats> {
    let step = step_name(category);
    let changed_before = env.now - env.settings.rating_min_age;
    let tickets = env
        .store
        .rating_candidates(category, changed_before)
        .await
        .with_context(|| format!("selecting {category} rating candidates"))?;
    info!(%category, tickets = tickets.len(), "found tickets to check for satisfaction rating");

    let mut stats = SatisfactionStats::new(category);
    for ticket in &tickets {
        stats.examined += 1;
        match rate_ticket(env, category, ticket, &mut stats).await {
            Ok(TicketOutcome::AlreadyRated) => stats.already_rated += 1,
            Ok(TicketOutcome::NotEvaluable) => stats.not_evaluable += 1,
            Ok(TicketOutcome::Rated { score, follow_up }) => {
                match score {
                    RatingScore::Good => stats.rated_good += 1,
                    RatingScore::Bad => stats.rated_bad += 1,
                }
                if follow_up {
                    stats.follow_ups += 1;
                }
            }
            Ok(TicketOutcome::FollowUpResumed) => {
                stats.follow_ups += 1;
                stats.resumed_follow_ups += 1;
            }
            Err(err) => {
                stats.failed += 1;
                env.reporter
                    .capture(step, format!("ticket {}", ticket.id), &err)
                    .await;
            }
        }
    }
    Ok(stats)
}

/// A bad rating is recorded with `follow_up_pending` set and cleared only once
/// the follow-up exists, so a failed follow-up is retried by the next run.
async fn rate_ticket(
    env: &JobEnv<'_>,
    category: Category,
    ticket: &Ticket,
    stats: &mut SatisfactionStats,
) -> Result<TicketOutcome> {
    let pending = ticket
        .pending_follow_up()
        .with_context(|| format!("reading payload of ticket {}", ticket.id))?;
    if let Some(rating) = pending {
        return resume_follow_up(env, category, ticket, rating, stats).await;
    }
    if ticket
        .has_satisfaction_rating()
        .with_context(|| format!("reading payload of ticket {}", ticket.id))?
    {
        debug!(ticket_id = ticket.id, "ticket already rated");
        return Ok(TicketOutcome::AlreadyRated);
    }

    let targets = resolve_targets(env, category, ticket, stats).await?;
    let Some(Evaluation { target, observation }) = evaluate(env, targets).await? else {
        debug!(ticket_id = ticket.id, %category, "no current metrics to evaluate");
        return Ok(TicketOutcome::NotEvaluable);
    };

    let score = observation.score();
    let request = RatingRequest {
        score,
        comment: observation.comment.clone(),
    };
    let mut rating = env
        .helpdesk
        .create_satisfaction_rating(ticket.id, &request)
        .await
        .with_context(|| format!("creating satisfaction rating for ticket {}", ticket.id))?;
    rating.follow_up_pending = !observation.success;
    env.store
        .record_rating(ticket.id, &rating)
        .await
        .with_context(|| format!("recording satisfaction rating for ticket {}", ticket.id))?;
    info!(
        ticket_id = ticket.id,
        score = score.as_str(),
        comment = %request.comment,
        "created satisfaction rating"
    );

    if observation.success {
        return Ok(TicketOutcome::Rated { score, follow_up: false });
    }
    open_follow_up(env, category, ticket, &target, rating).await?;
    Ok(TicketOutcome::Rated { score, follow_up: true })
}

/// Opens the follow-up for a rating recorded by an earlier run. The entity is
/// re-resolved from the ticket; the rating comment is reused as is.
async fn resume_follow_up(
    env: &JobEnv<'_>,
    category: Category,
    ticket: &Ticket,
    rating: SatisfactionRating,
    stats: &mut SatisfactionStats,
) -> Result<TicketOutcome> {
    let mut targets = resolve_targets(env, category, ticket, stats).await?;
    if targets.is_empty() {
        bail!("no entity to open the pending follow-up of ticket {} against", ticket.id);
    }
    let target = targets.swap_remove(0);
    info!(ticket_id = ticket.id, rating_id = rating.id, "resuming pending follow-up");
    open_follow_up(env, category, ticket, &target, rating).await?;
    Ok(TicketOutcome::FollowUpResumed)
}

async fn open_follow_up(
    env: &JobEnv<'_>,
    category: Category,
    ticket: &Ticket,
    target: &Target,
    mut rating: SatisfactionRating,
) -> Result<()> {
    let comment = rating.comment.clone().unwrap_or_default();
    let follow_up = follow_up_for(ticket, category, target, &comment);
    let follow_up_id = env
        .helpdesk
        .create_follow_up(&follow_up)
        .await
        .with_context(|| format!("creating follow-up for ticket {}", ticket.id))?;
    info!(ticket_id = ticket.id, follow_up_id, "created follow-up ticket");

    rating.follow_up_pending = false;
    env.store
        .record_rating(ticket.id, &rating)
        .await
        .with_context(|| format!("clearing pending follow-up of ticket {}", ticket.id))
}

/// The candidate entities of a ticket, in evaluation order.
async fn resolve_targets(
    env: &JobEnv<'_>,
    category: Category,
    ticket: &Ticket,
    stats: &mut SatisfactionStats,
) -> Result<Vec<Target>> {
    match category.scope() {
        MetricScope::Ticket => Ok(ticket_target(category, ticket)?.into_iter().collect()),
        MetricScope::Item => Ok(item_targets(env, category, ticket, stats).await),
    }
}

/// The first target that yields an observation wins.
async fn evaluate(env: &JobEnv<'_>, targets: Vec<Target>) -> Result<Option<Evaluation>> {
    for target in targets {
        let Some(metrics) = env
            .store
            .inventory_metrics(&target.parent_title, &target.store_id)
            .await
            .with_context(|| format!("loading inventory metrics for {}", target.parent_title))?
        else {
            continue;
        };
        if let Some(observation) = target
            .baseline
            .observe(&metrics, env.settings.zero_metric_policy)
        {
            return Ok(Some(Evaluation { target, observation }));
        }
    }
    Ok(None)
}

/// Item scope: one target per matching item. An item whose metrics cannot be
/// parsed is reported and skipped.
async fn item_targets(
    env: &JobEnv<'_>,
    category: Category,
    ticket: &Ticket,
    stats: &mut SatisfactionStats,
) -> Vec<Target> {
    let Some(store_id) = non_blank(ticket.store_id.as_deref()) else {
        return Vec::new();
    };
    let mut targets = Vec::new();
    for item in ticket.items.iter().filter(|item| category.matches_item(item)) {
        let baseline = match category.parse_baseline(item.metrics_json.as_deref()) {
            Ok(baseline) => baseline,
            Err(err) => {
                stats.bad_items += 1;
                let err = anyhow::Error::new(err)
                    .context(format!("parsing metrics of item {}", item.id));
                env.reporter
                    .capture(
                        step_name(category),
                        format!("ticket {} item {}", ticket.id, item.id),
                        &err,
                    )
                    .await;
                continue;
            }
        };
        let Some(parent_title) = non_blank(baseline.parent_title())
            .or_else(|| non_blank(item.parent_title.as_deref()))
            .map(str::to_string)
        else {
            continue;
        };
        targets.push(Target {
            baseline,
            parent_title,
            store_id: store_id.to_string(),
        });
    }
    targets
}

/// Ticket scope: the ticket itself carries the baseline.
fn ticket_target(category: Category, ticket: &Ticket) -> Result<Option<Target>> {
    let baseline = category
        .parse_baseline(ticket.metrics_json.as_deref())
        .with_context(|| format!("parsing metrics of ticket {}", ticket.id))?;
    let parent_title =
        non_blank(ticket.parent_title.as_deref()).or_else(|| non_blank(baseline.parent_title()));
    let store_id = non_blank(baseline.store_id()).or_else(|| non_blank(ticket.store_id.as_deref()));
    let (Some(parent_title), Some(store_id)) = (parent_title, store_id) else {
        return Ok(None);
    };
    let (parent_title, store_id) = (parent_title.to_string(), store_id.to_string());
    Ok(Some(Target {
        baseline,
        parent_title,
        store_id,
    }))
}

fn follow_up_for(ticket: &Ticket, category: Category, target: &Target, comment: &str) -> FollowUpTicket {
    let mut tags = ticket.tags.clone();
    if !tags.iter().any(|t| t == FOLLOW_UP_TAG) {
        tags.push(FOLLOW_UP_TAG.to_string());
    }
    FollowUpTicket {
        source_ticket_id: ticket.id,
        subject: format!("Follow-up: {}", ticket.subject),
        body: format!(
            "Ticket #{} ({category}) for {} in store {} was rated bad.\n{comment}",
            ticket.id, target.parent_title, target.store_id
        ),
        requester_email: target
            .baseline
            .buyer()
            .map(|buyer| buyer.trim().to_lowercase())
            .filter(|buyer| !buyer.is_empty()),
        store_id: Some(target.store_id.clone()),
        tags,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
