//! Quota-limited ads API: the data source for sync jobs and the target of
//! automated changes.
//!
//! Implementations report failures as [`AdpilotError::TransientApi`] (network,
//! 5xx, 429) or [`AdpilotError::FatalApi`] (any other 4xx, malformed
//! responses). Callers charge the rate limiter before every call; the adapter
//! itself does not throttle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::automation::action::ProposedAction;
use crate::config::ApiConfig;
use crate::error::{AdpilotError, Result};
use crate::sync_job::DateWindow;
use crate::types::SyncType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    /// A concrete entity type, never `all`.
    pub entity: SyncType,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: u64,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait AdsApi: Send + Sync {
    async fn fetch_page(&self, account_id: &str, request: &PageRequest) -> Result<Page>;

    async fn apply_change(&self, account_id: &str, action: &ProposedAction) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HttpAdsApi
// ---------------------------------------------------------------------------

pub struct HttpAdsApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageBody {
    #[serde(default)]
    records: Vec<serde_json::Value>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeBody<'a> {
    account_id: &'a str,
    #[serde(flatten)]
    action: &'a ProposedAction,
}

impl HttpAdsApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdpilotError::FatalApi(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build from config, reading the bearer token from `api.token_env`.
    pub fn from_config(cfg: &ApiConfig) -> Result<Self> {
        let token = std::env::var(&cfg.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!(env = %cfg.token_env, "no API token set; requests go out unauthenticated");
        }
        Self::new(&cfg.base_url, token, Duration::from_secs(cfg.timeout_secs))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }
}

fn classify_status(status: StatusCode, body: String) -> AdpilotError {
    let msg = format!("{status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AdpilotError::TransientApi(msg)
    } else {
        AdpilotError::FatalApi(msg)
    }
}

fn classify_transport(e: reqwest::Error) -> AdpilotError {
    if e.is_decode() || e.is_builder() {
        AdpilotError::FatalApi(e.to_string())
    } else {
        AdpilotError::TransientApi(e.to_string())
    }
}

#[async_trait]
impl AdsApi for HttpAdsApi {
    async fn fetch_page(&self, account_id: &str, request: &PageRequest) -> Result<Page> {
        let url = format!(
            "{}/v2/accounts/{}/{}",
            self.base_url,
            account_id,
            request.entity.as_str()
        );
        let mut query: Vec<(&str, String)> = vec![("pageSize", request.page_size.to_string())];
        if let Some(t) = &request.page_token {
            query.push(("nextToken", t.clone()));
        }
        if let Some(w) = &request.window {
            query.push(("startDate", w.start.to_string()));
            query.push(("endDate", w.end.to_string()));
        }
        if let Some(c) = &request.channel {
            query.push(("channel", c.clone()));
        }

        let resp = self
            .authorize(self.client.get(&url).query(&query))
            .send()
            .await
            .map_err(classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let body: PageBody = resp.json().await.map_err(classify_transport)?;
        Ok(Page {
            records: body.records.len() as u64,
            next_token: body.next_token.filter(|t| !t.is_empty()),
        })
    }

    async fn apply_change(&self, account_id: &str, action: &ProposedAction) -> Result<()> {
        let url = format!("{}/v2/accounts/{}/changes", self.base_url, account_id);
        let body = ChangeBody { account_id, action };
        let resp = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::action::ActionChange;
    use chrono::NaiveDate;
    use mockito::Matcher;

    fn api(server: &mockito::ServerGuard) -> HttpAdsApi {
        HttpAdsApi::new(server.url(), Some("tok".to_string()), Duration::from_secs(5)).unwrap()
    }

    fn request() -> PageRequest {
        PageRequest {
            entity: SyncType::Performance,
            page_size: 50,
            page_token: Some("p2".to_string()),
            window: Some(DateWindow {
                start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            }),
            channel: Some("sp".to_string()),
        }
    }

    #[tokio::test]
    async fn fetch_page_counts_records_and_follows_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/accounts/acct-1/performance")
            .match_header("authorization", "Bearer tok")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pageSize".into(), "50".into()),
                Matcher::UrlEncoded("nextToken".into(), "p2".into()),
                Matcher::UrlEncoded("startDate".into(), "2025-01-01".into()),
                Matcher::UrlEncoded("endDate".into(), "2025-01-09".into()),
                Matcher::UrlEncoded("channel".into(), "sp".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"records":[{"id":1},{"id":2},{"id":3}],"nextToken":"p3"}"#)
            .create_async()
            .await;

        let page = api(&server).fetch_page("acct-1", &request()).await.unwrap();
        assert_eq!(page.records, 3);
        assert_eq!(page.next_token.as_deref(), Some("p3"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_and_throttling_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;
        let err = api(&server).fetch_page("a", &request()).await.unwrap_err();
        assert!(err.is_transient(), "{err}");

        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", Matcher::Any)
            .with_status(429)
            .create_async()
            .await;
        let err = api(&server).fetch_page("a", &request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_errors_are_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", Matcher::Any)
            .with_status(401)
            .with_body("bad token")
            .create_async()
            .await;
        let err = api(&server).fetch_page("a", &request()).await.unwrap_err();
        assert!(matches!(err, AdpilotError::FatalApi(ref m) if m.contains("bad token")));
    }

    #[tokio::test]
    async fn apply_change_posts_action() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/accounts/acct-1/changes")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "accountId": "acct-1",
                "target_id": "kw-9",
                "type": "bid_adjustment",
                "proposed_bid": 1.2
            })))
            .with_status(200)
            .create_async()
            .await;

        let action = ProposedAction {
            target_id: "kw-9".to_string(),
            confidence: 0.9,
            change: ActionChange::BidAdjustment {
                current_bid: 1.0,
                proposed_bid: 1.2,
            },
            reason: None,
        };
        api(&server).apply_change("acct-1", &action).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let api = HttpAdsApi::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        let err = api.fetch_page("a", &request()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
