//! Scripted transport for exercising the client and store without a server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

pub(crate) struct ScriptedTransport {
    handler: Handler,
    log: Mutex<Vec<ApiRequest>>,
    held: Option<(String, Arc<Notify>)>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
            held: None,
        }
    }

    /// Requests to `path` wait for `release` before the handler answers.
    pub(crate) fn hold(mut self, path: &str, release: Arc<Notify>) -> Self {
        self.held = Some((path.to_string(), release));
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.log.lock().unwrap().push(request.clone());
        // Give concurrently polled requests a chance to interleave.
        tokio::task::yield_now().await;
        if let Some((path, release)) = &self.held {
            if *path == request.path {
                release.notified().await;
            }
        }
        (self.handler)(request)
    }
}

pub(crate) fn json(status: u16, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
    let status = StatusCode::from_u16(status).unwrap();
    Ok(ApiResponse::new(status, body.to_string()))
}

pub(crate) fn user_json(id: &str, email: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "email": email,
        "firstName": "Test",
        "lastName": "User",
        "status": { "userType": "customer", "emailVerified": true, "activated": true }
    })
}
