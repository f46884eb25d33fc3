//! OpenAI adapter (Assistants v2 threads + runs).
//!
//! Implements `relay-core`'s `AssistantPort` over the HTTP API: one thread per
//! conversation, one run per inbound message, polled until it settles.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use relay_core::{
    assistant::{latest_assistant_reply, AssistantPort, MessageRole, ThreadMessage},
    config::Config,
    domain::ThreadId,
    errors::Error,
    Result,
};

/// Connection + polling settings for the Assistants API.
#[derive(Clone, Debug)]
pub struct OpenAiAssistantConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub base_url: String,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
    /// How many recent thread messages to scan for the reply.
    pub history_window: u32,
}

impl From<&Config> for OpenAiAssistantConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            api_key: cfg.openai_api_key.clone(),
            assistant_id: cfg.assistant_id.clone(),
            base_url: cfg.openai_base_url.clone(),
            poll_interval: cfg.poll_interval,
            run_timeout: cfg.run_timeout,
            history_window: cfg.history_window,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiAssistantClient {
    cfg: OpenAiAssistantConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    role: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

/// Run statuses that can still change on their own.
fn is_pending(status: &str) -> bool {
    matches!(status, "queued" | "in_progress" | "cancelling")
}

fn to_thread_messages(list: MessageList) -> Vec<ThreadMessage> {
    list.data
        .into_iter()
        .map(|m| ThreadMessage {
            role: MessageRole::parse(&m.role),
            text: m.content.into_iter().find_map(|c| match c {
                ContentBlock::Text { text } => Some(text.value),
                ContentBlock::Other => None,
            }),
        })
        .collect()
}

impl OpenAiAssistantClient {
    pub fn new(cfg: OpenAiAssistantConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::External(format!("openai client build error: {e}")))?;
        Ok(Self { cfg, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.cfg.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.cfg.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("openai {what} request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openai {what} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::External(format!("openai {what} json error: {e}")))
    }

    async fn add_user_message(&self, thread: &ThreadId, text: &str) -> Result<()> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{}/messages", thread.as_str()),
            )
            .json(&json!({ "role": "user", "content": text }));
        let _: serde_json::Value = self.send_json("add message", req).await?;
        Ok(())
    }

    /// Start a run and poll it until it leaves the pending states.
    async fn run_to_completion(&self, thread: &ThreadId) -> Result<RunObject> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{}/runs", thread.as_str()),
            )
            .json(&json!({ "assistant_id": self.cfg.assistant_id }));
        let mut run: RunObject = self.send_json("create run", req).await?;
        debug!(thread = %thread, run = %run.id, status = %run.status, "run started");

        let started = Instant::now();
        while is_pending(&run.status) {
            if started.elapsed() >= self.cfg.run_timeout {
                self.cancel_run(thread, &run.id).await;
                return Err(Error::AssistantRunTimeout {
                    run_id: run.id,
                    waited: started.elapsed(),
                });
            }
            sleep(self.cfg.poll_interval).await;
            let req = self.request(
                reqwest::Method::GET,
                &format!("/threads/{}/runs/{}", thread.as_str(), run.id),
            );
            run = self.send_json("poll run", req).await?;
        }

        debug!(thread = %thread, run = %run.id, status = %run.status, "run settled");
        Ok(run)
    }

    /// Best-effort: a run left pending keeps the thread locked for new messages.
    async fn cancel_run(&self, thread: &ThreadId, run_id: &str) {
        let req = self.request(
            reqwest::Method::POST,
            &format!("/threads/{}/runs/{run_id}/cancel", thread.as_str()),
        );
        match self.send_json::<serde_json::Value>("cancel run", req).await {
            Ok(_) => debug!(thread = %thread, run = %run_id, "timed-out run cancelled"),
            Err(e) => warn!(thread = %thread, run = %run_id, error = %e, "could not cancel timed-out run"),
        }
    }

    async fn recent_messages(&self, thread: &ThreadId) -> Result<Vec<ThreadMessage>> {
        let req = self
            .request(
                reqwest::Method::GET,
                &format!("/threads/{}/messages", thread.as_str()),
            )
            .query(&[
                ("limit", self.cfg.history_window.to_string()),
                ("order", "desc".to_string()),
            ]);
        let list: MessageList = self.send_json("list messages", req).await?;
        Ok(to_thread_messages(list))
    }
}

#[async_trait]
impl AssistantPort for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<ThreadId> {
        let req = self
            .request(reqwest::Method::POST, "/threads")
            .json(&json!({}));
        let thread: ThreadObject = self.send_json("create thread", req).await?;
        Ok(ThreadId(thread.id))
    }

    async fn ask(&self, thread: &ThreadId, text: &str) -> Result<String> {
        self.add_user_message(thread, text).await?;

        let run = self.run_to_completion(thread).await?;
        if run.status != "completed" {
            warn!(thread = %thread, run = %run.id, status = %run.status, "run did not complete");
            return Err(Error::AssistantRunFailed { status: run.status });
        }

        let recent = self.recent_messages(thread).await?;
        Ok(latest_assistant_reply(&recent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use relay_core::assistant::NO_RESPONSE_FALLBACK;
    use serde_json::Value;

    #[test]
    fn pending_statuses() {
        assert!(is_pending("queued"));
        assert!(is_pending("in_progress"));
        assert!(is_pending("cancelling"));
        for terminal in [
            "completed",
            "failed",
            "cancelled",
            "expired",
            "requires_action",
            "incomplete",
        ] {
            assert!(!is_pending(terminal), "{terminal}");
        }
    }

    #[test]
    fn message_list_maps_roles_and_first_text_block() {
        let list: MessageList = serde_json::from_value(serde_json::json!({
            "object": "list",
            "data": [
                {
                    "id": "msg_2",
                    "role": "assistant",
                    "content": [
                        { "type": "image_file", "image_file": { "file_id": "f" } },
                        { "type": "text", "text": { "value": "Refunds take 5 days.", "annotations": [] } }
                    ]
                },
                {
                    "id": "msg_1",
                    "role": "user",
                    "content": [ { "type": "text", "text": { "value": "refund?", "annotations": [] } } ]
                }
            ]
        }))
        .unwrap();

        let msgs = to_thread_messages(list);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, MessageRole::Assistant);
        assert_eq!(msgs[0].text.as_deref(), Some("Refunds take 5 days."));
        assert_eq!(msgs[1].role, MessageRole::User);
    }

    /// Scripted stand-in for the Assistants API.
    struct MockApi {
        run_statuses: Mutex<Vec<&'static str>>,
        messages: Value,
        polls: AtomicUsize,
        cancels: AtomicUsize,
        posted: Mutex<Vec<Value>>,
        saw_beta_header: Mutex<bool>,
    }

    impl MockApi {
        fn new(run_statuses: Vec<&'static str>, messages: Value) -> Arc<Self> {
            Arc::new(Self {
                run_statuses: Mutex::new(run_statuses),
                messages,
                polls: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                posted: Mutex::new(Vec::new()),
                saw_beta_header: Mutex::new(false),
            })
        }

        fn next_status(&self) -> &'static str {
            let mut statuses = self.run_statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            }
        }
    }

    async fn create_thread(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Json<Value> {
        *api.saw_beta_header.lock().unwrap() =
            headers.get("OpenAI-Beta").and_then(|v| v.to_str().ok()) == Some("assistants=v2");
        Json(serde_json::json!({ "id": "thread_abc", "object": "thread" }))
    }

    async fn add_message(
        State(api): State<Arc<MockApi>>,
        Path(thread): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        api.posted.lock().unwrap().push(body);
        Json(serde_json::json!({ "id": "msg_user", "thread_id": thread }))
    }

    async fn list_messages(State(api): State<Arc<MockApi>>) -> Json<Value> {
        Json(api.messages.clone())
    }

    async fn create_run(State(api): State<Arc<MockApi>>) -> Json<Value> {
        Json(serde_json::json!({ "id": "run_1", "status": api.next_status() }))
    }

    async fn get_run(State(api): State<Arc<MockApi>>) -> Json<Value> {
        api.polls.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({ "id": "run_1", "status": api.next_status() }))
    }

    async fn cancel_run(State(api): State<Arc<MockApi>>) -> Json<Value> {
        api.cancels.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({ "id": "run_1", "status": "cancelling" }))
    }

    async fn broken_thread() -> (StatusCode, &'static str) {
        (StatusCode::UNAUTHORIZED, "{\"error\":\"bad key\"}")
    }

    async fn serve(api: Arc<MockApi>) -> String {
        let app = Router::new()
            .route("/threads", post(create_thread))
            .route(
                "/threads/:thread/messages",
                post(add_message).get(list_messages),
            )
            .route("/threads/:thread/runs", post(create_run))
            .route("/threads/:thread/runs/:run", get(get_run))
            .route("/threads/:thread/runs/:run/cancel", post(cancel_run))
            .route("/broken/threads", post(broken_thread))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> OpenAiAssistantClient {
        OpenAiAssistantClient::new(OpenAiAssistantConfig {
            api_key: "sk-test".to_string(),
            assistant_id: "asst_123".to_string(),
            base_url,
            poll_interval: Duration::from_millis(5),
            run_timeout: Duration::from_secs(5),
            history_window: 5,
        })
        .unwrap()
    }

    fn assistant_reply(text: &str) -> Value {
        serde_json::json!({
            "data": [
                { "role": "assistant", "content": [ { "type": "text", "text": { "value": text } } ] },
                { "role": "user", "content": [ { "type": "text", "text": { "value": "q" } } ] }
            ]
        })
    }

    #[tokio::test]
    async fn create_thread_returns_backend_id_with_beta_header() {
        let api = MockApi::new(vec!["completed"], assistant_reply("x"));
        let c = client(serve(api.clone()).await);
        let thread = c.create_thread().await.unwrap();
        assert_eq!(thread, ThreadId("thread_abc".to_string()));
        assert!(*api.saw_beta_header.lock().unwrap());
    }

    #[tokio::test]
    async fn ask_polls_until_completed_and_returns_latest_reply() {
        let api = MockApi::new(
            vec!["queued", "in_progress", "completed"],
            assistant_reply("Refunds take 5 days."),
        );
        let c = client(serve(api.clone()).await);

        let reply = c
            .ask(&ThreadId("thread_abc".to_string()), "refund policy?")
            .await
            .unwrap();

        assert_eq!(reply, "Refunds take 5 days.");
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
        let posted = api.posted.lock().unwrap().clone();
        assert_eq!(
            posted,
            vec![serde_json::json!({ "role": "user", "content": "refund policy?" })]
        );
    }

    #[tokio::test]
    async fn failed_run_surfaces_status() {
        let api = MockApi::new(vec!["in_progress", "failed"], assistant_reply("x"));
        let c = client(serve(api).await);

        let err = c
            .ask(&ThreadId("thread_abc".to_string()), "hi")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::AssistantRunFailed { ref status } if status == "failed"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn no_assistant_message_yields_fallback_text() {
        let only_user = serde_json::json!({
            "data": [ { "role": "user", "content": [ { "type": "text", "text": { "value": "q" } } ] } ]
        });
        let api = MockApi::new(vec!["completed"], only_user);
        let c = client(serve(api).await);

        let reply = c
            .ask(&ThreadId("thread_abc".to_string()), "hi")
            .await
            .unwrap();
        assert_eq!(reply, NO_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn stuck_run_times_out_and_is_cancelled() {
        let api = MockApi::new(vec!["in_progress"], assistant_reply("x"));
        let mut cfg = client(serve(api.clone()).await).cfg;
        cfg.run_timeout = Duration::from_millis(30);
        let c = OpenAiAssistantClient::new(cfg).unwrap();

        let err = c
            .ask(&ThreadId("thread_abc".to_string()), "hi")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::AssistantRunTimeout { ref run_id, .. } if run_id == "run_1"),
            "{err}"
        );
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_run_is_never_cancelled() {
        let api = MockApi::new(vec!["in_progress", "completed"], assistant_reply("ok"));
        let c = client(serve(api.clone()).await);

        c.ask(&ThreadId("thread_abc".to_string()), "hi").await.unwrap();
        assert_eq!(api.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn http_error_maps_to_external() {
        let api = MockApi::new(vec!["completed"], assistant_reply("x"));
        let base = serve(api).await;
        let c = client(format!("{base}/broken"));

        let err = c.create_thread().await.unwrap_err();
        match err {
            Error::External(msg) => {
                assert!(msg.contains("401"), "{msg}");
                assert!(msg.contains("bad key"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
