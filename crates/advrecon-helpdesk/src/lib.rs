//! Helpdesk platform client contract + Zendesk REST implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use advrecon_core::{RatingScore, SatisfactionRating};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "advrecon-helpdesk";

#[derive(Debug, Clone)]
pub struct HelpdeskConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl HelpdeskConfig {
    pub fn for_subdomain(subdomain: &str, email: &str, api_token: &str) -> Self {
        Self {
            base_url: format!("https://{subdomain}.zendesk.com"),
            email: email.to_string(),
            api_token: api_token.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("helpdesk request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("helpdesk returned http {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The platform no longer knows the ticket.
    AlreadyGone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingRequest {
    pub score: RatingScore,
    pub comment: String,
}

/// Follow-up ticket opened after a bad rating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpTicket {
    pub source_ticket_id: i64,
    pub subject: String,
    pub body: String,
    pub requester_email: Option<String>,
    pub store_id: Option<String>,
    pub tags: Vec<String>,
}

impl FollowUpTicket {
    fn to_payload(&self) -> serde_json::Value {
        let mut ticket = json!({
            "subject": self.subject,
            "comment": { "body": self.body, "public": false },
            "via_followup_source_id": self.source_ticket_id,
            "tags": self.tags,
        });
        if let Some(email) = &self.requester_email {
            let name = email.split('@').next().unwrap_or(email);
            ticket["requester"] = json!({ "email": email, "name": name });
        }
        if let Some(store_id) = &self.store_id {
            ticket["external_id"] = json!(format!("{store_id}:{}", self.source_ticket_id));
        }
        json!({ "ticket": ticket })
    }
}

#[async_trait]
pub trait HelpdeskClient: Send + Sync {
    async fn delete_ticket(&self, ticket_id: i64) -> Result<DeleteOutcome, HelpdeskError>;

    async fn create_satisfaction_rating(
        &self,
        ticket_id: i64,
        request: &RatingRequest,
    ) -> Result<SatisfactionRating, HelpdeskError>;

    /// Returns the id of the new ticket.
    async fn create_follow_up(&self, follow_up: &FollowUpTicket) -> Result<i64, HelpdeskError>;
}

#[derive(Debug, Deserialize)]
struct RatingEnvelope {
    satisfaction_rating: SatisfactionRating,
}

#[derive(Debug, Deserialize)]
struct TicketEnvelope {
    ticket: CreatedTicket,
}

#[derive(Debug, Deserialize)]
struct CreatedTicket {
    id: i64,
}

#[derive(Debug, Clone)]
pub struct ZendeskClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
}

impl ZendeskClient {
    pub fn new(config: HelpdeskConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email,
            api_token: config.api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, HelpdeskError> {
        let url = self.url(path);
        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(format!("{}/token", self.email), Some(&self.api_token));
        if let Some(body) = body {
            request = request.json(&body);
        }
        Ok(request.send().await?)
    }

    async fn expect_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, HelpdeskError> {
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HelpdeskError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl HelpdeskClient for ZendeskClient {
    async fn delete_ticket(&self, ticket_id: i64) -> Result<DeleteOutcome, HelpdeskError> {
        let span = info_span!("helpdesk_delete", ticket_id);
        async {
            let response = self
                .send(Method::DELETE, &format!("/api/v2/tickets/{ticket_id}"), None)
                .await?;
            let status = response.status();
            if status.is_success() {
                return Ok(DeleteOutcome::Deleted);
            }
            if status == StatusCode::NOT_FOUND {
                debug!(ticket_id, "ticket already gone at helpdesk");
                return Ok(DeleteOutcome::AlreadyGone);
            }
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(HelpdeskError::HttpStatus {
                status: status.as_u16(),
                url,
                body,
            })
        }
        .instrument(span)
        .await
    }

    async fn create_satisfaction_rating(
        &self,
        ticket_id: i64,
        request: &RatingRequest,
    ) -> Result<SatisfactionRating, HelpdeskError> {
        let body = json!({
            "satisfaction_rating": {
                "score": request.score,
                "comment": request.comment,
            }
        });
        let response = self
            .send(
                Method::POST,
                &format!("/api/v2/tickets/{ticket_id}/satisfaction_rating"),
                Some(body),
            )
            .instrument(info_span!("helpdesk_rating", ticket_id))
            .await?;
        let envelope: RatingEnvelope = Self::expect_json(response).await?;
        Ok(envelope.satisfaction_rating)
    }

    async fn create_follow_up(&self, follow_up: &FollowUpTicket) -> Result<i64, HelpdeskError> {
        let response = self
            .send(Method::POST, "/api/v2/tickets", Some(follow_up.to_payload()))
            .instrument(info_span!(
                "helpdesk_follow_up",
                source_ticket_id = follow_up.source_ticket_id
            ))
            .await?;
        let envelope: TicketEnvelope = Self::expect_json(response).await?;
        Ok(envelope.ticket.id)
    }
}

/// Call recorded by [`RecordingHelpdesk`].
#[derive(Debug, Clone, PartialEq)]
pub enum HelpdeskCall {
    Delete(i64),
    Rating(i64, RatingRequest),
    FollowUp(FollowUpTicket),
}

#[derive(Debug, Default)]
struct RecordingState {
    calls: Vec<HelpdeskCall>,
    failing_deletes: Vec<i64>,
    failing_follow_ups: usize,
    next_id: i64,
}

/// In-process helpdesk that records calls instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingHelpdesk {
    state: Mutex<RecordingState>,
}

impl RecordingHelpdesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_deletes(ticket_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            state: Mutex::new(RecordingState {
                failing_deletes: ticket_ids.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    /// Rejects the next `count` follow-up tickets; rejected ones are not recorded.
    pub fn failing_follow_ups(count: usize) -> Self {
        Self {
            state: Mutex::new(RecordingState {
                failing_follow_ups: count,
                ..Default::default()
            }),
        }
    }

    pub async fn calls(&self) -> Vec<HelpdeskCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn ratings(&self) -> Vec<(i64, RatingRequest)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                HelpdeskCall::Rating(id, request) => Some((id, request)),
                _ => None,
            })
            .collect()
    }

    pub async fn follow_ups(&self) -> Vec<FollowUpTicket> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                HelpdeskCall::FollowUp(ticket) => Some(ticket),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl HelpdeskClient for RecordingHelpdesk {
    async fn delete_ticket(&self, ticket_id: i64) -> Result<DeleteOutcome, HelpdeskError> {
        let mut state = self.state.lock().await;
        state.calls.push(HelpdeskCall::Delete(ticket_id));
        if state.failing_deletes.contains(&ticket_id) {
            return Err(HelpdeskError::Message(format!(
                "delete of ticket {ticket_id} rejected"
            )));
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn create_satisfaction_rating(
        &self,
        ticket_id: i64,
        request: &RatingRequest,
    ) -> Result<SatisfactionRating, HelpdeskError> {
        let mut state = self.state.lock().await;
        state.calls.push(HelpdeskCall::Rating(ticket_id, request.clone()));
        state.next_id += 1;
        Ok(SatisfactionRating {
            id: state.next_id,
            score: request.score,
            comment: Some(request.comment.clone()),
            follow_up_pending: false,
        })
    }

    async fn create_follow_up(&self, follow_up: &FollowUpTicket) -> Result<i64, HelpdeskError> {
        let mut state = self.state.lock().await;
        if state.failing_follow_ups > 0 {
            state.failing_follow_ups -= 1;
            return Err(HelpdeskError::Message(format!(
                "follow-up for ticket {} rejected",
                follow_up.source_ticket_id
            )));
        }
        state.calls.push(HelpdeskCall::FollowUp(follow_up.clone()));
        state.next_id += 1;
        Ok(state.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> ZendeskClient {
        ZendeskClient::new(HelpdeskConfig {
            base_url: format!("{}/", server.url()),
            email: "ops@example.com".into(),
            api_token: "secret".into(),
            timeout: Duration::from_secs(5),
            user_agent: Some("advrecon-test".into()),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn delete_treats_missing_ticket_as_gone() {
        let mut server = mockito::Server::new_async().await;
        let deleted = server
            .mock("DELETE", "/api/v2/tickets/41")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(204)
            .create_async()
            .await;
        let missing = server
            .mock("DELETE", "/api/v2/tickets/42")
            .with_status(404)
            .create_async()
            .await;
        let broken = server
            .mock("DELETE", "/api/v2/tickets/43")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = client(&server);
        assert_eq!(client.delete_ticket(41).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(client.delete_ticket(42).await.unwrap(), DeleteOutcome::AlreadyGone);
        match client.delete_ticket(43).await {
            Err(HelpdeskError::HttpStatus { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected delete result {other:?}"),
        }

        deleted.assert_async().await;
        missing.assert_async().await;
        broken.assert_async().await;
    }

    #[tokio::test]
    async fn rating_is_posted_and_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/tickets/7/satisfaction_rating")
            .match_body(Matcher::PartialJson(json!({
                "satisfaction_rating": { "score": "bad", "comment": "Previous ACOS = 70%, since solved - 65%" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"satisfaction_rating":{"id":9001,"score":"bad","comment":"Previous ACOS = 70%, since solved - 65%"}}"#)
            .create_async()
            .await;

        let rating = client(&server)
            .create_satisfaction_rating(
                7,
                &RatingRequest {
                    score: RatingScore::Bad,
                    comment: "Previous ACOS = 70%, since solved - 65%".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rating.id, 9001);
        assert_eq!(rating.score, RatingScore::Bad);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn follow_up_links_source_ticket() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/tickets")
            .match_body(Matcher::PartialJson(json!({
                "ticket": {
                    "via_followup_source_id": 7,
                    "requester": { "email": "buyer@example.com", "name": "buyer" },
                    "external_id": "AMAZ:7"
                }
            })))
            .with_status(201)
            .with_body(r#"{"ticket":{"id":8}}"#)
            .create_async()
            .await;

        let id = client(&server)
            .create_follow_up(&FollowUpTicket {
                source_ticket_id: 7,
                subject: "Follow-up: LowSpend-P1".into(),
                body: "spend did not improve".into(),
                requester_email: Some("buyer@example.com".into()),
                store_id: Some("AMAZ".into()),
                tags: vec!["adv_item".into()],
            })
            .await
            .unwrap();
        assert_eq!(id, 8);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn recording_helpdesk_fails_configured_deletes() {
        let helpdesk = RecordingHelpdesk::failing_deletes([5]);
        assert!(helpdesk.delete_ticket(4).await.is_ok());
        assert!(helpdesk.delete_ticket(5).await.is_err());
        assert_eq!(
            helpdesk.calls().await,
            vec![HelpdeskCall::Delete(4), HelpdeskCall::Delete(5)]
        );
    }

    #[tokio::test]
    async fn recording_helpdesk_rejects_first_follow_ups() {
        let helpdesk = RecordingHelpdesk::failing_follow_ups(1);
        let follow_up = FollowUpTicket {
            source_ticket_id: 3,
            subject: "Follow-up: LowSpend-P1".into(),
            body: "spend did not improve".into(),
            requester_email: None,
            store_id: Some("AMAZ".into()),
            tags: vec![],
        };
        assert!(helpdesk.create_follow_up(&follow_up).await.is_err());
        assert!(helpdesk.follow_ups().await.is_empty());
        assert!(helpdesk.create_follow_up(&follow_up).await.is_ok());
        assert_eq!(helpdesk.follow_ups().await, vec![follow_up]);
    }
}
