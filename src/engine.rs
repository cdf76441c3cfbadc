use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::dashboard::DashboardClient;
use crate::error::RelayError;
use crate::models::{ImportSettings, RunPhase, RunState, TaskResult};
use crate::payload::{build_payload, PayloadOverrides};
use crate::session::{check_base_url, SessionContext, MSG_MISSING_COOKIE};

pub const MSG_NEED_URL_AND_COOKIE: &str = "请输入基础URL和Cookie";
pub const MSG_VALIDATING: &str = "正在验证API连接...";
pub const MSG_VALID: &str = "API连接验证成功";
pub const MSG_INVALID: &str = "API连接验证失败";
const MSG_STARTING: &str = "开始添加任务...";
const MSG_UNKNOWN_ERROR: &str = "未知错误";

/// Path from the importer to the dashboard.
#[async_trait]
pub trait TaskRelay: Send + Sync {
    async fn create(&self, session: &SessionContext, payload: &Value) -> Result<Value, RelayError>;
    async fn list(&self, session: &SessionContext) -> Result<Value, RelayError>;
}

#[async_trait]
impl<T: TaskRelay + ?Sized> TaskRelay for Box<T> {
    async fn create(&self, session: &SessionContext, payload: &Value) -> Result<Value, RelayError> {
        (**self).create(session, payload).await
    }

    async fn list(&self, session: &SessionContext) -> Result<Value, RelayError> {
        (**self).list(session).await
    }
}

/// Sends every call through a running import proxy.
pub struct ProxyRelay {
    http: reqwest::Client,
    proxy_url: String,
}

impl ProxyRelay {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            proxy_url: proxy_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, RelayError> {
        let response = self
            .http
            .post(format!("{}{}", self.proxy_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| RelayError::Transport(e.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        if status.is_success() {
            Ok(body)
        } else {
            Err(RelayError::Rejected { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl TaskRelay for ProxyRelay {
    async fn create(&self, session: &SessionContext, payload: &Value) -> Result<Value, RelayError> {
        self.post(
            "/api/import",
            json!({ "baseUrl": session.base_url(), "cookie": session.credential(), "data": payload }),
        )
        .await
    }

    async fn list(&self, session: &SessionContext) -> Result<Value, RelayError> {
        self.post(
            "/api/list",
            json!({ "baseUrl": session.base_url(), "cookie": session.credential() }),
        )
        .await
    }
}

/// Talks to the dashboard in-process, skipping the proxy hop.
pub struct DirectRelay {
    client: DashboardClient,
}

impl DirectRelay {
    pub fn new(client: DashboardClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskRelay for DirectRelay {
    async fn create(&self, session: &SessionContext, payload: &Value) -> Result<Value, RelayError> {
        let reply = self
            .client
            .create_service(session.base_url(), session.credential(), payload)
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(RelayError::Rejected { status: reply.status, body: reply.body })
        }
    }

    async fn list(&self, session: &SessionContext) -> Result<Value, RelayError> {
        let reply = self
            .client
            .list_services(session.base_url(), session.credential())
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(RelayError::Rejected { status: reply.status, body: reply.body })
        }
    }
}

/// JavaScript-style truthiness, which is how the dashboard's `success` flag is read.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub struct Importer<R: TaskRelay> {
    relay: R,
    state: Arc<Mutex<RunState>>,
}

impl<R: TaskRelay> Importer<R> {
    pub fn new(relay: R) -> Self {
        Self {
            relay,
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    /// Shared handle for observers that poll while a run is in flight.
    pub fn state(&self) -> Arc<Mutex<RunState>> {
        Arc::clone(&self.state)
    }

    pub async fn snapshot(&self) -> RunState {
        self.state.lock().await.clone()
    }

    async fn set_message(&self, message: impl Into<String>) {
        self.state.lock().await.message = message.into();
    }

    /// Connectivity check. Leaves the verdict on `session` and the reason in the run message.
    pub async fn validate(&self, session: &mut SessionContext) -> bool {
        if session.base_url().is_empty() || session.credential().is_empty() {
            session.mark_validated(false);
            self.set_message(MSG_NEED_URL_AND_COOKIE).await;
            return false;
        }

        self.set_message(MSG_VALIDATING).await;
        let (valid, message) = match self.relay.list(session).await {
            Ok(body) if is_truthy(&body) => (true, MSG_VALID.to_string()),
            Ok(_) => (false, MSG_INVALID.to_string()),
            Err(e) => (false, format!("{}: {}", MSG_INVALID, e)),
        };

        session.mark_validated(valid);
        if valid {
            info!(base_url = %session.base_url(), "dashboard connection verified");
        } else {
            warn!(base_url = %session.base_url(), reason = %message, "dashboard connection rejected");
        }
        self.set_message(message).await;
        valid
    }

    async fn abort(&self, reason: impl Into<String>) -> RunState {
        let reason = reason.into();
        error!(reason = %reason, "import aborted before submission");
        let mut state = self.state.lock().await;
        state.abort(reason);
        state.clone()
    }

    /// Validates, then submits one task per catalog leaf, strictly one at a time.
    pub async fn run_batch(
        &self,
        session: &mut SessionContext,
        catalog: &Catalog,
        settings: &ImportSettings,
    ) -> RunState {
        if let Err(reason) = check_base_url(session.base_url()) {
            return self.abort(reason).await;
        }
        if session.credential().is_empty() {
            return self.abort(MSG_MISSING_COOKIE).await;
        }

        self.state.lock().await.phase = RunPhase::Validating;
        if !self.validate(session).await {
            let reason = self.state.lock().await.message.clone();
            return self.abort(reason).await;
        }

        self.set_message(MSG_STARTING).await;
        let leaves = catalog.leaves();
        let total = catalog.total();
        {
            let mut state = self.state.lock().await;
            state.reset(total);
            state.phase = RunPhase::Running;
        }
        info!(total, "starting import");

        let overrides = PayloadOverrides {
            duration: Some(settings.duration),
            max_latency: Some(settings.max_latency),
            min_latency: Some(settings.min_latency),
            ..Default::default()
        };

        for leaf in leaves {
            let name = leaf.task_name();
            let payload = build_payload(&name, leaf.address, &overrides);
            let outcome = match serde_json::to_value(&payload) {
                Ok(body) => self.relay.create(session, &body).await,
                Err(e) => Err(RelayError::Transport(e.to_string())),
            };

            let (success, response) = match outcome {
                Ok(body) if body.get("success").is_some_and(is_truthy) => (true, body),
                Ok(body) if is_truthy(&body) => (false, body),
                Ok(_) => (false, Value::String(MSG_UNKNOWN_ERROR.into())),
                Err(e) => (false, e.into_payload()),
            };

            if success {
                info!(task = %name, target = %payload.target, "task created");
            } else {
                warn!(task = %name, target = %payload.target, response = %response, "task rejected");
            }

            let mut state = self.state.lock().await;
            state.record(TaskResult {
                name,
                target: leaf.address.to_string(),
                success,
                response,
            });
        }

        let mut state = self.state.lock().await;
        state.finish();
        info!(
            total = state.progress.total,
            succeeded = state.progress.succeeded,
            failed = state.progress.failed,
            "import finished"
        );
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted relay: replays queued create outcomes and records every payload.
    #[derive(Default)]
    struct ScriptedRelay {
        list_reply: StdMutex<Option<Result<Value, RelayError>>>,
        create_replies: StdMutex<VecDeque<Result<Value, RelayError>>>,
        created: StdMutex<Vec<Value>>,
        list_calls: StdMutex<usize>,
        watched: StdMutex<Option<Arc<Mutex<RunState>>>>,
        messages_seen: StdMutex<Vec<String>>,
    }

    impl ScriptedRelay {
        fn accepting() -> Self {
            let relay = Self::default();
            *relay.list_reply.lock().unwrap() = Some(Ok(json!({ "success": true, "data": [] })));
            relay
        }

        fn push(&self, reply: Result<Value, RelayError>) {
            self.create_replies.lock().unwrap().push_back(reply);
        }
    }

    #[async_trait]
    impl TaskRelay for ScriptedRelay {
        async fn create(&self, _session: &SessionContext, payload: &Value) -> Result<Value, RelayError> {
            self.created.lock().unwrap().push(payload.clone());
            if let Some(state) = self.watched.lock().unwrap().as_ref() {
                if let Ok(state) = state.try_lock() {
                    self.messages_seen.lock().unwrap().push(state.message.clone());
                }
            }
            self.create_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "success": true })))
        }

        async fn list(&self, _session: &SessionContext) -> Result<Value, RelayError> {
            *self.list_calls.lock().unwrap() += 1;
            self.list_reply.lock().unwrap().clone().unwrap_or(Ok(Value::Null))
        }
    }

    fn session() -> SessionContext {
        SessionContext::new("https://nezha.example.com:8008", "nz-jwt=token")
    }

    fn settings() -> ImportSettings {
        ImportSettings { duration: 30, max_latency: 0, min_latency: 0 }
    }

    fn two_regions() -> Catalog {
        Catalog::from_json(
            r#"{"Beijing": {"Telecom": "1.1.1.1", "Unicom": "2.2.2.2"},
                "Shanghai": {"Mobile": "3.3.3.3"}}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn single_leaf_end_to_end() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let catalog = Catalog::from_json(r#"{"Beijing": {"Unicom": "1.1.1.1"}}"#).unwrap();

        let state = importer.run_batch(&mut session(), &catalog, &settings()).await;

        let created = importer.relay.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["name"], "BeijingUnicom");
        assert_eq!(created[0]["target"], "1.1.1.1:80");
        assert_eq!(created[0]["duration"], 30);
        assert_eq!(created[0]["type"], 3);
        assert_eq!(created[0]["skip_servers"], json!({}));

        assert_eq!(state.phase, RunPhase::Done);
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].target, "1.1.1.1");
        assert_eq!(state.message, "完成! 共添加 1 个任务，成功 1 个，失败 0 个");
    }

    #[tokio::test]
    async fn results_follow_catalog_order() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let state = importer.run_batch(&mut session(), &two_regions(), &settings()).await;

        let names: Vec<&str> = state.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["BeijingTelecom", "BeijingUnicom", "ShanghaiMobile"]);
        assert_eq!(state.progress.total, 3);
        assert_eq!(state.progress.completed, 3);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_leaf() {
        let relay = ScriptedRelay::accepting();
        relay.push(Ok(json!({ "success": false, "error": "duplicate" })));
        relay.push(Err(RelayError::Transport("connection reset".into())));
        relay.push(Ok(json!({ "success": true, "data": 12 })));
        let importer = Importer::new(relay);

        let state = importer.run_batch(&mut session(), &two_regions(), &settings()).await;

        assert_eq!(importer.relay.created.lock().unwrap().len(), 3);
        assert!(!state.results[0].success);
        assert_eq!(state.results[0].response["error"], "duplicate");
        assert!(!state.results[1].success);
        assert_eq!(state.results[1].response, json!("connection reset"));
        assert!(state.results[2].success);
        assert_eq!(state.results[2].response["data"], 12);
        assert_eq!(state.progress.succeeded, 1);
        assert_eq!(state.progress.failed, 2);
        assert_eq!(state.message, "完成! 共添加 3 个任务，成功 1 个，失败 2 个");
    }

    #[tokio::test]
    async fn rejected_status_carries_body_and_empty_body_is_unknown() {
        let relay = ScriptedRelay::accepting();
        relay.push(Err(RelayError::Rejected { status: 401, body: json!({ "error": "expired" }) }));
        relay.push(Ok(Value::String(String::new())));
        let importer = Importer::new(relay);

        let state = importer.run_batch(&mut session(), &two_regions(), &settings()).await;

        assert_eq!(state.results[0].response, json!({ "error": "expired" }));
        assert_eq!(state.results[1].response, json!("未知错误"));
        assert!(state.results[2].success);
    }

    #[tokio::test]
    async fn empty_base_url_aborts_without_submissions() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let mut session = SessionContext::new("", "nz-jwt=token");

        let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;

        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].name, "错误");
        assert_eq!(state.results[0].response, json!("请输入基础URL"));
        assert!(importer.relay.created.lock().unwrap().is_empty());
        assert_eq!(*importer.relay.list_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn schemeless_base_url_is_not_completed_by_the_driver() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let mut session = SessionContext::new("example.com", "nz-jwt=token");

        let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;

        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.results[0].response, json!("URL格式不正确，请输入有效的URL"));
        assert!(importer.relay.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_cookie_aborts() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let mut session = SessionContext::new("https://nezha.example.com", "");

        let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].response, json!("请输入Cookie"));
    }

    #[tokio::test]
    async fn rejected_credential_blocks_the_run() {
        let relay = ScriptedRelay::default();
        *relay.list_reply.lock().unwrap() = Some(Err(RelayError::Rejected {
            status: 403,
            body: json!({ "success": false, "error": "ApiErrorUnauthorized" }),
        }));
        let importer = Importer::new(relay);
        let mut session = session();

        assert!(!importer.validate(&mut session).await);
        let message = importer.snapshot().await.message;
        assert!(message.starts_with("API连接验证失败: "));
        assert!(message.contains("ApiErrorUnauthorized"));

        let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;
        assert_eq!(state.phase, RunPhase::Aborted);
        assert_eq!(state.results.len(), 1);
        assert!(state.results[0].response.as_str().unwrap().contains("ApiErrorUnauthorized"));
        assert!(!session.is_validated());
        assert!(importer.relay.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_list_body_is_invalid() {
        let importer = Importer::new(ScriptedRelay::default());
        let mut session = session();
        assert!(!importer.validate(&mut session).await);
        assert_eq!(importer.snapshot().await.message, "API连接验证失败");
    }

    #[tokio::test]
    async fn validation_reruns_every_batch() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let mut session = session();

        importer.run_batch(&mut session, &two_regions(), &settings()).await;
        importer.run_batch(&mut session, &two_regions(), &settings()).await;

        assert_eq!(*importer.relay.list_calls.lock().unwrap(), 2);
        assert!(session.is_validated());
    }

    #[tokio::test]
    async fn new_run_resets_previous_results() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let mut session = session();
        importer.run_batch(&mut session, &two_regions(), &settings()).await;

        let single = Catalog::from_json(r#"{"Beijing": {"Unicom": "1.1.1.1"}}"#).unwrap();
        let state = importer.run_batch(&mut session, &single, &settings()).await;

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.progress.total, 1);
        assert_eq!(state.progress.succeeded, 1);
    }

    #[tokio::test]
    async fn settings_pass_through_unchecked() {
        let importer = Importer::new(ScriptedRelay::accepting());
        let catalog = Catalog::from_json(r#"{"Beijing": {"Unicom": "1.1.1.1"}}"#).unwrap();
        let settings = ImportSettings { duration: 0, max_latency: 10, min_latency: 500 };

        importer.run_batch(&mut session(), &catalog, &settings).await;

        let created = importer.relay.created.lock().unwrap().clone();
        assert_eq!(created[0]["duration"], 0);
        assert_eq!(created[0]["max_latency"], 10);
        assert_eq!(created[0]["min_latency"], 500);
    }

    #[tokio::test]
    async fn progress_starts_at_zero_before_first_submission() {
        let importer = Importer::new(ScriptedRelay::accepting());
        *importer.relay.watched.lock().unwrap() = Some(importer.state());

        importer.run_batch(&mut session(), &two_regions(), &settings()).await;

        let seen = importer.relay.messages_seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["进度: 0/3", "进度: 1/3", "进度: 2/3"]);
    }

    #[tokio::test]
    async fn abort_after_a_run_clears_counters() {
        let importer = Importer::new(ScriptedRelay::accepting());
        importer.run_batch(&mut session(), &two_regions(), &settings()).await;

        let state = importer
            .run_batch(&mut SessionContext::new("", "nz-jwt=token"), &two_regions(), &settings())
            .await;

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.progress, crate::models::RunProgress::default());
    }

    mod over_http {
        use super::*;
        use crate::api::create_router;
        use crate::dashboard::SERVICE_PATH;
        use crate::models::RunPhase;
        use crate::session::SessionContext;
        use axum::{
            http::{HeaderMap, StatusCode},
            response::IntoResponse,
            routing::post,
            Json, Router,
        };
        use serde_json::{json, Value};

        const GOOD_COOKIE: &str = "nz-jwt=good";

        async fn spawn(app: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            format!("http://{}", addr)
        }

        /// Accepts the good cookie; refuses BeijingTelecom as a duplicate and
        /// answers ShanghaiMobile with a plain-text gateway error.
        fn dashboard() -> Router {
            Router::new().route(
                SERVICE_PATH,
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if headers["cookie"] != GOOD_COOKIE {
                        return (StatusCode::FORBIDDEN, Json(json!({ "success": false, "error": "expired" })))
                            .into_response();
                    }
                    match body["name"].as_str() {
                        Some("BeijingTelecom") => (
                            StatusCode::FORBIDDEN,
                            Json(json!({ "success": false, "error": "duplicate" })),
                        )
                            .into_response(),
                        Some("ShanghaiMobile") => (StatusCode::BAD_GATEWAY, "bad gateway").into_response(),
                        _ => Json(json!({ "success": true, "data": body["target"] })).into_response(),
                    }
                })
                .get(|headers: HeaderMap| async move {
                    if headers["cookie"] != GOOD_COOKIE {
                        return (StatusCode::FORBIDDEN, Json(json!({ "success": false, "error": "expired" })));
                    }
                    (StatusCode::OK, Json(json!({ "success": true, "data": [] })))
                }),
            )
        }

        async fn check_relay<R: TaskRelay>(relay: R, dashboard: &str) {
            let importer = Importer::new(relay);
            let mut session = SessionContext::new(dashboard, GOOD_COOKIE);

            let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;

            assert_eq!(state.phase, RunPhase::Done);
            assert_eq!(state.results.len(), 3);
            assert!(!state.results[0].success);
            assert_eq!(state.results[0].response, json!({ "success": false, "error": "duplicate" }));
            assert!(state.results[1].success);
            assert_eq!(state.results[1].response["data"], "2.2.2.2:80");
            assert!(!state.results[2].success);
            assert_eq!(state.results[2].response, json!("bad gateway"));
            assert_eq!(state.message, "完成! 共添加 3 个任务，成功 1 个，失败 2 个");

            session.set_credential("nz-jwt=stale");
            let state = importer.run_batch(&mut session, &two_regions(), &settings()).await;
            assert_eq!(state.phase, RunPhase::Aborted);
            assert_eq!(state.results.len(), 1);
            let reason = state.results[0].response.as_str().unwrap();
            assert!(reason.starts_with("API连接验证失败: "));
            assert!(reason.contains("expired"));
        }

        #[tokio::test]
        async fn proxy_relay_runs_through_the_import_proxy() {
            let dashboard = spawn(dashboard()).await;
            let proxy = spawn(create_router(DashboardClient::default())).await;
            check_relay(ProxyRelay::new(format!("{}/", proxy)), &dashboard).await;
        }

        #[tokio::test]
        async fn direct_relay_talks_to_the_dashboard() {
            let dashboard = spawn(dashboard()).await;
            check_relay(DirectRelay::new(DashboardClient::default()), &dashboard).await;
        }

        #[tokio::test]
        async fn proxy_relay_reports_transport_failure() {
            let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let dead = format!("http://{}", closed.local_addr().unwrap());
            drop(closed);

            let relay = ProxyRelay::new(dead);
            let session = SessionContext::new("https://nezha.example.com", GOOD_COOKIE);
            let err = relay.list(&session).await.unwrap_err();
            assert!(matches!(err, RelayError::Transport(_)));
            assert!(matches!(
                relay.create(&session, &json!({ "name": "x" })).await,
                Err(RelayError::Transport(_))
            ));
        }

        #[tokio::test]
        async fn proxy_relay_keeps_status_and_body_of_rejections() {
            let proxy = spawn(create_router(DashboardClient::default())).await;
            let relay = ProxyRelay::new(proxy);
            let session = SessionContext::new("https://nezha.example.com", "");

            match relay.list(&session).await {
                Err(RelayError::Rejected { status, body }) => {
                    assert_eq!(status, 400);
                    assert_eq!(body, json!({ "message": "缺少必要参数" }));
                }
                other => panic!("expected rejection, got {:?}", other),
            }
        }
    }

    #[test]
    fn truthiness_matches_dashboard_flags() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("ok")));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }
}
