//! Local axum server standing in for the catalog and offset endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Path and query string.
    pub uri: String,
    pub body: String,
}

pub type RequestLog = Arc<Mutex<Vec<Recorded>>>;

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    body: Arc<str>,
    delay: Duration,
    log: RequestLog,
}

async fn respond(
    State(canned): State<Canned>,
    method: Method,
    uri: Uri,
    body: String,
) -> impl IntoResponse {
    canned.log.lock().push(Recorded {
        method,
        uri: uri.to_string(),
        body,
    });
    tokio::time::sleep(canned.delay).await;
    (
        canned.status,
        [(header::CONTENT_TYPE, "application/json")],
        canned.body.to_string(),
    )
}

/// Serves `body` with `status` on every path after `delay`.
///
/// Returns the base URL and the log of received requests.
pub async fn serve(status: u16, body: &str, delay: Duration) -> (String, RequestLog) {
    let log = RequestLog::default();
    let canned = Canned {
        status: StatusCode::from_u16(status).expect("valid status code"),
        body: Arc::from(body),
        delay,
        log: Arc::clone(&log),
    };
    let app = Router::new().fallback(respond).with_state(canned);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), log)
}
