//! A [`kube::Client`] talking to an in-process fake API server.

use std::sync::{Arc, Mutex};

use http::{Request, Response, StatusCode, header::CONTENT_TYPE};
use kube::client::Body;
use tower_test::mock::{self, Handle};

pub type ApiServerHandle = Handle<Request<Body>, Response<Body>>;

/// Requests seen by the fake API server, as `METHOD path`.
pub type RequestLog = Arc<Mutex<Vec<String>>>;

const NOT_FOUND: &str = r#"{
  "kind": "Status",
  "apiVersion": "v1",
  "metadata": {},
  "status": "Failure",
  "message": "not found",
  "reason": "NotFound",
  "code": 404
}"#;

const EMPTY_LIST: &str = r#"{"apiVersion": "v1", "kind": "List", "metadata": {}, "items": []}"#;

pub fn mock_client() -> (kube::Client, ApiServerHandle) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (kube::Client::new(service, "default"), handle)
}

/// Answers like an API server without any objects until the client goes away: listings are
/// empty, everything else is not found.
pub fn serve_empty(mut handle: ApiServerHandle) -> RequestLog {
    let log = RequestLog::default();
    let seen = Arc::clone(&log);
    tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            seen.lock()
                .unwrap()
                .push(format!("{} {}", request.method(), request.uri().path()));
            let is_list = request
                .uri()
                .query()
                .is_some_and(|query| query.contains("labelSelector"));
            let (status, body) = if is_list {
                (StatusCode::OK, EMPTY_LIST)
            } else {
                (StatusCode::NOT_FOUND, NOT_FOUND)
            };
            let response = Response::builder()
                .status(status)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.as_bytes().to_vec()))
                .unwrap();
            send.send_response(response);
        }
    });
    log
}
