//! The conversational backend seam.
//!
//! Implementations (HTTP LLM clients, on-device models, the mock responder)
//! are interchangeable behind [`ChatBackend`]; the controller enforces at
//! most one outstanding call. Backend substitution happens at configuration
//! time via [`select_backend`], never mid-turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::Message;

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    RequestFailed(String),
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Probed at configuration time only.
    async fn is_available(&self) -> bool {
        true
    }

    async fn send_conversation(
        &self,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<String, BackendError>;
}

/// One-time user-facing notice produced when configuration substitutes a
/// fallback backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNotice {
    pub message: String,
}

/// Pick the preferred backend when it is usable, otherwise substitute the
/// fallback and report a notice. Called once at configuration time; a turn
/// never switches backends mid-flight.
pub async fn select_backend(
    preferred: Arc<dyn ChatBackend>,
    fallback: Arc<dyn ChatBackend>,
) -> (Arc<dyn ChatBackend>, Option<ConfigNotice>) {
    if preferred.is_available().await {
        return (preferred, None);
    }
    warn!(
        target: "turn",
        preferred = preferred.name(),
        fallback = fallback.name(),
        "preferred backend unusable, substituting fallback"
    );
    let notice = ConfigNotice {
        message: format!(
            "{} is not available; using {} instead",
            preferred.name(),
            fallback.name()
        ),
    };
    (fallback, Some(notice))
}

/// Configurable mock responder.
pub struct MockBackend {
    name: String,
    default_reply: String,
    delay: Duration,
    available: AtomicBool,
    scripted: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            default_reply: "mock reply".to_string(),
            delay: Duration::ZERO,
            available: AtomicBool::new(true),
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        let mut backend = Self::new();
        backend.default_reply = reply.into();
        backend
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue one response consumed before the default reply.
    pub fn push_response(&self, response: Result<String, BackendError>) {
        self.scripted.lock().push_back(response);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Message lists received so far, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send_conversation(
        &self,
        messages: &[Message],
        _system_prompt: &str,
    ) -> Result<String, BackendError> {
        self.requests.lock().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        info!(
            target: "turn",
            backend = %self.name,
            messages = messages.len(),
            ok = response.is_ok(),
            "mock backend responding"
        );
        response
    }
}
