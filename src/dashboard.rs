use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ForwardError;

pub const SERVICE_PATH: &str = "/api/v1/service";

/// Status and body of whatever the dashboard answered.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Value,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin client for the dashboard's service API.
#[derive(Clone, Default)]
pub struct DashboardClient {
    http: reqwest::Client,
}

impl DashboardClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn create_service(
        &self,
        base_url: &str,
        cookie: &str,
        payload: &Value,
    ) -> Result<UpstreamReply, ForwardError> {
        let url = service_url(base_url);
        let headers = dashboard_headers(base_url, cookie)?;
        debug!(url = %url, "POST service");
        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(payload)
            .send()
            .await
            .inspect_err(|e| warn!(url = %url, error = %e, "dashboard create failed"))?;
        read_reply(response).await
    }

    pub async fn list_services(&self, base_url: &str, cookie: &str) -> Result<UpstreamReply, ForwardError> {
        let url = service_url(base_url);
        let headers = dashboard_headers(base_url, cookie)?;
        debug!(url = %url, "GET service");
        let response = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .inspect_err(|e| warn!(url = %url, error = %e, "dashboard list failed"))?;
        read_reply(response).await
    }
}

fn service_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), SERVICE_PATH)
}

fn dashboard_headers(base_url: &str, cookie: &str) -> Result<HeaderMap, ForwardError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(cookie).map_err(|_| ForwardError::InvalidHeader("cookie".into()))?,
    );
    let referer = format!("{}/dashboard/service", base_url.trim_end_matches('/'));
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(&referer).map_err(|_| ForwardError::InvalidHeader("referer".into()))?,
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    Ok(headers)
}

async fn read_reply(response: reqwest::Response) -> Result<UpstreamReply, ForwardError> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    // Non-JSON bodies (proxy error pages and the like) travel as a string.
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(UpstreamReply { status, body })
}
