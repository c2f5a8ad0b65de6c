//! Local HTTP server that replays queued replies and records what it received.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A queued answer. Replies always carry a JSON content type.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

impl Reply {
    pub fn json(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// A `{"error": message}` body with the given status.
    pub fn status(status: u16, message: &str) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            body: serde_json::json!({ "error": message }).to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct Exchange {
    replies: VecDeque<Reply>,
    received: Vec<Received>,
}

/// Serves every path on an ephemeral port until dropped. An empty reply
/// queue answers `200 {}`.
pub struct MockServer {
    base_url: String,
    exchange: Arc<Mutex<Exchange>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let exchange = Arc::new(Mutex::new(Exchange::default()));
        let app = Router::new().fallback(answer).with_state(exchange.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            exchange,
            task,
        }
    }

    pub fn enqueue(&self, reply: Reply) {
        self.exchange.lock().replies.push_back(reply);
    }

    pub fn received(&self) -> Vec<Received> {
        self.exchange.lock().received.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    State(exchange): State<Arc<Mutex<Exchange>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let reply = {
        let mut exchange = exchange.lock();
        exchange.received.push(Received {
            method,
            path: uri.path().to_string(),
            headers,
            body,
        });
        exchange
            .replies
            .pop_front()
            .unwrap_or_else(|| Reply::json("{}"))
    };

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
}
