//! An in-process stand-in for the Kubernetes API server, used by unit tests.

use http::{Request, Response};
use hyper::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::{BoxError, Service};

/// How the mock answers a request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Answer with a fixed status and body.
    Json { status: u16, body: Value },
    /// Answer with the request body, as the API server does for a successful create.
    Echo { status: u16 },
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Reply::Json { status, body }
    }

    pub(crate) fn created() -> Self {
        Reply::Echo { status: 201 }
    }

    pub(crate) fn status(code: u16, reason: &str, message: &str) -> Self {
        Reply::Json {
            status: code,
            body: status_body(code, reason, message),
        }
    }

    /// What the API server returns for a delete that was accepted.
    pub(crate) fn deleted() -> Self {
        Reply::Json {
            status: 200,
            body: json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Success",
                "code": 200
            }),
        }
    }

    pub(crate) fn not_found(resource: &str, name: &str) -> Self {
        Self::status(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
    }

    pub(crate) fn already_exists(resource: &str, name: &str) -> Self {
        Self::status(
            409,
            "AlreadyExists",
            &format!("{} \"{}\" already exists", resource, name),
        )
    }
}

fn status_body(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: Option<Value>,
}

#[derive(Default)]
struct State {
    replies: HashMap<(String, String), VecDeque<Reply>>,
    requests: Vec<Recorded>,
}

/// Replies are matched on exact (method, path). Replies queued for the same key are used in
/// order and the last one keeps answering. Unmatched requests get a `NotFound` status.
#[derive(Clone, Default)]
pub(crate) struct MockApiServer {
    state: Arc<Mutex<State>>,
}

impl MockApiServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// Discovery answer for a group version, e.g. `apiextensions.k8s.io/v1`.
    pub(crate) fn on_discovery(
        &self,
        group_version: &str,
        kind: &str,
        plural: &str,
        namespaced: bool,
    ) -> &Self {
        let path = if group_version.contains('/') {
            format!("/apis/{}", group_version)
        } else {
            format!("/api/{}", group_version)
        };
        self.on(
            "GET",
            &path,
            Reply::json(
                200,
                json!({
                    "kind": "APIResourceList",
                    "apiVersion": "v1",
                    "groupVersion": group_version,
                    "resources": [{
                        "name": plural,
                        "singularName": "",
                        "namespaced": namespaced,
                        "kind": kind,
                        "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"]
                    }]
                }),
            ),
        )
    }

    pub(crate) fn client(&self, namespace: &str) -> Client {
        Client::new(self.clone(), namespace)
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests with the given method whose path starts with `prefix`.
    pub(crate) fn requests_to(&self, method: &str, prefix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .collect()
    }

    fn next_reply(&self, method: &str, path: &str) -> Option<Reply> {
        let mut state = self.state.lock().unwrap();
        let queue = state
            .replies
            .get_mut(&(method.to_string(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn record(&self, request: Recorded) {
        self.state.lock().unwrap().requests.push(request);
    }
}

impl Service<Request<Body>> for MockApiServer {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let bytes = hyper::body::to_bytes(request.into_body()).await?;
            let body: Option<Value> = serde_json::from_slice(&bytes).ok();
            let reply = server.next_reply(&method, &path);
            server.record(Recorded {
                method,
                path: path.clone(),
                body: body.clone(),
            });
            let (status, payload) = match reply {
                Some(Reply::Json { status, body }) => (status, body),
                Some(Reply::Echo { status }) => (status, body.unwrap_or(Value::Null)),
                None => (
                    404,
                    status_body(404, "NotFound", &format!("{} not found", path)),
                ),
            };
            let response = Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payload)?))?;
            Ok::<_, BoxError>(response)
        })
    }
}
