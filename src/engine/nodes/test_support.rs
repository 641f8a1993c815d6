//! Local HTTP stub used by the outbound node tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, Response, StatusCode},
    routing::any,
    Router,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Holds the process-wide env lock while variables are overridden.
pub(crate) struct EnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    pub(crate) fn lock() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        Self {
            saved: Vec::new(),
            _lock: lock,
        }
    }

    pub(crate) fn set(key: &'static str, value: impl Into<String>) -> Self {
        let mut guard = Self::lock();
        guard.put(key, value);
        guard
    }

    pub(crate) fn put(&mut self, key: &'static str, value: impl Into<String>) {
        self.saved.push((key, std::env::var(key).ok()));
        std::env::set_var(key, value.into());
    }

    pub(crate) fn clear(&mut self, key: &'static str) {
        self.saved.push((key, std::env::var(key).ok()));
        std::env::remove_var(key);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub(crate) fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct StubState<F>
where
    F: Fn() -> Response<Body> + Send + Sync + 'static,
{
    tx: UnboundedSender<RecordedRequest>,
    response_factory: Arc<F>,
}

impl<F> Clone for StubState<F>
where
    F: Fn() -> Response<Body> + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            response_factory: Arc::clone(&self.response_factory),
        }
    }
}

async fn stub_handler<F>(State(state): State<StubState<F>>, request: Request<Body>) -> Response<Body>
where
    F: Fn() -> Response<Body> + Send + Sync + 'static,
{
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, 1024 * 1024).await.unwrap_or_default();
    let headers = parts
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let record = RecordedRequest {
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        headers,
        body: bytes.to_vec(),
    };
    let _ = state.tx.send(record);
    (state.response_factory)()
}

pub(crate) async fn spawn_stub_server<F>(
    response_factory: F,
) -> (SocketAddr, UnboundedReceiver<RecordedRequest>, JoinHandle<()>)
where
    F: Fn() -> Response<Body> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = unbounded_channel();
    let state = StubState {
        tx,
        response_factory: Arc::new(response_factory),
    };

    let app = Router::new()
        .route("/{*path}", any(stub_handler::<F>))
        .with_state(state);

    let server = axum::serve(listener, app.into_make_service());
    let handle = tokio::spawn(async move {
        if let Err(err) = server.await {
            eprintln!("stub server exited with error: {err}");
        }
    });

    (addr, rx, handle)
}

pub(crate) fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub(crate) fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}
