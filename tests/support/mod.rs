//! Shared test fixtures: a scripted transport and config helpers

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_exporter::export::{ExportConfig, RetryPolicy};
use store_exporter::fetcher::{ApiRequest, ApiResponse, Transport, TransportError};
use store_exporter::EntityKind;

pub const API_BASE: &str = "http://store.test";
pub const STORE_HASH: &str = "abc123";

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Response(ApiResponse),
    Error(TransportError),
}

impl From<ApiResponse> for Reply {
    fn from(response: ApiResponse) -> Self {
        Reply::Response(response)
    }
}

struct Route {
    path: String,
    params: Vec<(String, String)>,
    replies: VecDeque<Reply>,
    delay: Duration,
}

impl Route {
    fn matches(&self, request: &ApiRequest) -> bool {
        request.url.ends_with(&self.path)
            && self
                .params
                .iter()
                .all(|(k, v)| request.param(k) == Some(v.as_str()))
    }
}

/// Transport answering from per-route reply queues
///
/// Routes match on URL suffix plus a subset of query parameters; the first matching
/// route wins. The last reply of a queue repeats forever. Unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, path: &str, params: &[(&str, &str)], replies: Vec<Reply>) {
        self.route_with_delay(path, params, replies, Duration::ZERO);
    }

    pub fn route_with_delay(
        &self,
        path: &str,
        params: &[(&str, &str)],
        replies: Vec<Reply>,
        delay: Duration,
    ) {
        self.routes.lock().unwrap().push(Route {
            path: path.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            replies: replies.into(),
            delay,
        });
    }

    /// Every request seen so far, in send order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose URL ends with `path`
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(path))
            .collect()
    }

    fn next_reply(&self, request: &ApiRequest) -> (Reply, Duration) {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|route| route.matches(request)) else {
            return (Reply::Response(status(404, "no scripted route")), Duration::ZERO);
        };
        let reply = if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        };
        let reply = reply.unwrap_or_else(|| Reply::Response(status(404, "empty script")));
        (reply, route.delay)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let (reply, delay) = self.next_reply(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Response(response) => Ok(response),
            Reply::Error(err) => Err(err),
        }
    }
}

pub fn json_ok(body: Value) -> Reply {
    Reply::Response(ApiResponse::new(200, vec![], body.to_string()))
}

pub fn status(code: u16, body: &str) -> ApiResponse {
    ApiResponse::new(code, vec![], body)
}

pub fn status_reply(code: u16) -> Reply {
    Reply::Response(status(code, r#"{"title":"scripted failure"}"#))
}

pub fn rate_limited(retry_after: Option<&str>) -> Reply {
    let headers = retry_after
        .map(|v| vec![("Retry-After".to_string(), v.to_string())])
        .unwrap_or_default();
    Reply::Response(ApiResponse::new(429, headers, r#"{"title":"Too many requests"}"#))
}

pub fn timeout() -> Reply {
    Reply::Error(TransportError::Timeout("operation timed out".into()))
}

/// `{ data, meta.pagination }` envelope
pub fn envelope(items: Vec<Value>, current_page: u64, total_pages: u64, total: u64) -> Value {
    serde_json::json!({
        "data": items,
        "meta": {
            "pagination": {
                "total": total,
                "count": items.len(),
                "per_page": 250,
                "current_page": current_page,
                "total_pages": total_pages
            }
        }
    })
}

/// Retry schedule without jitter so paused-clock tests are exact
pub fn exact_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        jitter_ratio: 0.0,
        ..RetryPolicy::default()
    }
}

pub fn config(kind: EntityKind) -> ExportConfig {
    ExportConfig::builder(STORE_HASH, "test-token")
        .for_entity(kind)
        .api_base(API_BASE)
        .build()
        .unwrap()
}

pub fn store_url(path: &str) -> String {
    format!("{API_BASE}/stores/{STORE_HASH}/{path}")
}
