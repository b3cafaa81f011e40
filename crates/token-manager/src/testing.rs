//! In-process token endpoint for tests
//!
//! Binds an axum server on 127.0.0.1:0 that answers each POST with the next
//! scripted `(status, body)` pair and records the submitted form fields.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Script {
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

pub(crate) struct MockProvider {
    pub url: String,
    script: Script,
    _server: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let script = Script {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::default(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route("/oauth2/token", axum::routing::post(respond))
            .with_state(script.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/oauth2/token"),
            script,
            _server: server,
        }
    }

    /// A 200 response carrying a bearer token pair.
    pub fn ok(access: &str, refresh: &str, expires_in: u64) -> (u16, String) {
        (
            200,
            serde_json::json!({
                "access_token": access,
                "refresh_token": refresh,
                "token_type": "bearer",
                "expires_in": expires_in,
                "host": "www.wrike.com",
            })
            .to_string(),
        )
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.script.requests.lock().unwrap().clone()
    }
}

async fn respond(
    State(script): State<Script>,
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    script.requests.lock().unwrap().push(fields);
    let next = script.responses.lock().unwrap().pop_front();
    match next {
        Some((status, body)) => (StatusCode::from_u16(status).unwrap(), body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no scripted response left".to_string(),
        ),
    }
}
