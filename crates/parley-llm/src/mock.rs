use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use parley_core::errors::{FailureCause, GatewayError};
use parley_core::gateway::{validate_conversation, ModelGateway};
use parley_core::turn::Turn;

/// Pre-programmed outcomes for deterministic testing without API calls.
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<ScriptedReply>),
    /// Wait until the gate is notified, then resolve the inner reply.
    Gated(Arc<Notify>, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_owned())
    }

    pub fn failure(cause: FailureCause) -> Self {
        Self::Error(GatewayError::GenerationFailed(cause))
    }

    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn gated(gate: Arc<Notify>, inner: ScriptedReply) -> Self {
        Self::Gated(gate, Box::new(inner))
    }
}

/// Gateway that returns scripted replies in sequence and records every
/// conversation it was asked to continue.
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Vec<Turn>>>,
    call_count: AtomicUsize,
    started: Notify,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            started: Notify::new(),
        }
    }

    /// Number of generate calls that passed validation.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Conversations received, in call order.
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().clone()
    }

    /// Resolves once a generate call has started. A call that started before
    /// this was awaited is not missed.
    pub async fn wait_for_call(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, conversation: &[Turn]) -> Result<String, GatewayError> {
        validate_conversation(conversation)?;

        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(conversation.to_vec());
        let reply = self.replies.lock().pop_front();
        self.started.notify_one();

        let Some(reply) = reply else {
            return Err(FailureCause::MalformedResponse(format!(
                "no scripted reply for call {idx}"
            ))
            .into());
        };

        resolve(reply).await
    }
}

/// Unrolls nested delays and gates iteratively.
async fn resolve(reply: ScriptedReply) -> Result<String, GatewayError> {
    let mut current = reply;
    loop {
        match current {
            ScriptedReply::Text(text) => return Ok(text),
            ScriptedReply::Error(e) => return Err(e),
            ScriptedReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            ScriptedReply::Gated(gate, inner) => {
                gate.notified().await;
                current = *inner;
            }
        }
    }
}
