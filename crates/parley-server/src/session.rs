//! Per-connection chat sessions.
//!
//! The coordinator owns the map from connection id to conversation. A session
//! is created on connect and removed on disconnect; a generation that
//! finishes after its session was removed is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use parley_core::errors::{ChatError, FailureCause, GatewayError};
use parley_core::gateway::ModelGateway;
use parley_core::history::{History, HISTORY_LIMIT};
use parley_core::ids::ConnectionId;
use parley_core::prompt::{self, PromptPayload};
use parley_core::turn::Turn;

use crate::protocol::ServerEvent;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub history_limit: usize,
    pub generation_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

/// One live connection's state.
struct Session {
    /// Held across the model call, so one generation runs at a time.
    conversation: Mutex<History>,
    terminated: AtomicBool,
}

impl Session {
    fn new(history_limit: usize) -> Self {
        Self {
            conversation: Mutex::new(History::with_limit(history_limit)),
            terminated: AtomicBool::new(false),
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

pub struct SessionCoordinator {
    gateway: Arc<dyn ModelGateway>,
    sessions: DashMap<ConnectionId, Arc<Session>>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: CoordinatorConfig) -> Self {
        Self {
            gateway,
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn gateway(&self) -> &dyn ModelGateway {
        self.gateway.as_ref()
    }

    /// Start a session with an empty conversation. Reconnecting with a live id
    /// keeps the existing session.
    pub fn connect(&self, id: &ConnectionId) {
        let _ = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Session::new(self.config.history_limit)));
        info!(connection_id = %id, "session started");
    }

    /// Discard the conversation. Any in-flight generation for it is dropped
    /// when it completes.
    pub fn disconnect(&self, id: &ConnectionId, reason: &str) {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.terminated.store(true, Ordering::Release);
                info!(connection_id = %id, reason, "session ended");
            }
            None => debug!(connection_id = %id, reason, "disconnect for unknown session"),
        }
    }

    pub fn is_active(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of a session's conversation.
    pub async fn conversation(&self, id: &ConnectionId) -> Option<Vec<Turn>> {
        let session = self.session(id)?;
        let history = session.conversation.lock().await;
        Some(history.turns().to_vec())
    }

    fn session(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Handle one chat request and return the event to send back, if any.
    ///
    /// Returns `None` when the connection has no live session, either because
    /// it never connected or because it disconnected before the reply was
    /// ready.
    pub async fn handle_chat(
        &self,
        id: &ConnectionId,
        payload: impl Into<PromptPayload>,
    ) -> Option<ServerEvent> {
        let Some(session) = self.session(id) else {
            debug!(connection_id = %id, "chat for inactive session ignored");
            return None;
        };

        let prompt = match prompt::prompt_from(payload) {
            Ok(prompt) => prompt,
            Err(e) => {
                debug!(connection_id = %id, error_kind = e.kind(), "rejected chat request");
                return Some(ServerEvent::Error(e.client_message().to_owned()));
            }
        };

        let mut history = session.conversation.lock().await;
        if session.is_terminated() {
            return None;
        }

        history.append(Turn::user(prompt));
        let result = self.generate(history.turns()).await;

        if session.is_terminated() {
            info!(connection_id = %id, "discarding generation for ended session");
            return None;
        }

        match result {
            Ok(reply) => {
                history.append(Turn::model(reply.clone()));
                debug!(connection_id = %id, turns = history.len(), "reply generated");
                Some(ServerEvent::Reply(reply))
            }
            Err(e) => {
                let e = ChatError::from(e);
                warn!(
                    connection_id = %id,
                    error = %e,
                    error_kind = e.kind(),
                    turns = history.len(),
                    "generation failed"
                );
                Some(ServerEvent::Error(e.client_message().to_owned()))
            }
        }
    }

    async fn generate(&self, conversation: &[Turn]) -> Result<String, GatewayError> {
        let timeout = self.config.generation_timeout;
        match tokio::time::timeout(timeout, self.gateway.generate(conversation)).await {
            Ok(result) => result,
            Err(_) => Err(FailureCause::Timeout(timeout).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::turn::Role;
    use parley_llm::mock::{ScriptedGateway, ScriptedReply};
    use serde_json::json;
    use tokio::sync::Notify;

    fn coordinator(
        replies: Vec<ScriptedReply>,
    ) -> (Arc<SessionCoordinator>, Arc<ScriptedGateway>) {
        let gateway = Arc::new(ScriptedGateway::new(replies));
        let coordinator = Arc::new(SessionCoordinator::new(
            gateway.clone(),
            CoordinatorConfig::default(),
        ));
        (coordinator, gateway)
    }

    fn connected(
        replies: Vec<ScriptedReply>,
    ) -> (Arc<SessionCoordinator>, Arc<ScriptedGateway>, ConnectionId) {
        let (coordinator, gateway) = coordinator(replies);
        let id = ConnectionId::new();
        coordinator.connect(&id);
        (coordinator, gateway, id)
    }

    #[tokio::test]
    async fn reply_appends_user_and_model_turns() {
        let (coordinator, _, id) = connected(vec![ScriptedReply::text("hi")]);

        let event = coordinator.handle_chat(&id, "hello").await;
        assert_eq!(event, Some(ServerEvent::Reply("hi".into())));

        let convo = coordinator.conversation(&id).await.unwrap();
        assert_eq!(convo, vec![Turn::user("hello"), Turn::model("hi")]);
    }

    #[tokio::test]
    async fn structured_payloads_are_normalized() {
        let (coordinator, gateway, id) = connected(vec![
            ScriptedReply::text("one"),
            ScriptedReply::text("two"),
        ]);

        let _ = coordinator.handle_chat(&id, json!({"prompt": "  first "})).await;
        let _ = coordinator.handle_chat(&id, json!({"promt": "second"})).await;

        let calls = gateway.calls();
        assert_eq!(calls[0], vec![Turn::user("first")]);
        assert_eq!(
            calls[1],
            vec![Turn::user("first"), Turn::model("one"), Turn::user("second")]
        );
    }

    #[tokio::test]
    async fn whitespace_prompt_emits_error_without_turns() {
        let (coordinator, gateway, id) = connected(vec![ScriptedReply::text("unused")]);

        let event = coordinator.handle_chat(&id, "  ").await;
        assert_eq!(event, Some(ServerEvent::Error("No prompt provided.".into())));
        assert!(coordinator.conversation(&id).await.unwrap().is_empty());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn absent_payload_is_empty_prompt() {
        let (coordinator, _, id) = connected(vec![]);
        let event = coordinator.handle_chat(&id, None::<serde_json::Value>).await;
        assert_eq!(event, Some(ServerEvent::Error("No prompt provided.".into())));
    }

    #[tokio::test]
    async fn gateway_failure_keeps_only_user_turn() {
        let (coordinator, _, id) = connected(vec![ScriptedReply::failure(
            FailureCause::Authentication("API key not valid".into()),
        )]);

        let event = coordinator.handle_chat(&id, "hello").await;
        assert_eq!(
            event,
            Some(ServerEvent::Error("Failed to generate AI response.".into()))
        );

        let convo = coordinator.conversation(&id).await.unwrap();
        assert_eq!(convo, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn failure_detail_never_reaches_client() {
        let (coordinator, _, id) = connected(vec![ScriptedReply::failure(FailureCause::Server {
            status: 500,
            body: "internal stack trace".into(),
        })]);

        match coordinator.handle_chat(&id, "hello").await {
            Some(ServerEvent::Error(msg)) => assert!(!msg.contains("stack trace")),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn thirty_prompts_keep_most_recent_twenty_four_turns() {
        let replies = (0..30).map(|i| ScriptedReply::Text(format!("r{i}"))).collect();
        let (coordinator, _, id) = connected(replies);

        for i in 0..30 {
            let event = coordinator.handle_chat(&id, format!("p{i}").as_str()).await;
            assert_eq!(event, Some(ServerEvent::Reply(format!("r{i}"))));
        }

        let convo = coordinator.conversation(&id).await.unwrap();
        assert_eq!(convo.len(), 24);
        assert_eq!(convo[0], Turn::user("p18"));
        assert_eq!(convo[23], Turn::model("r29"));
        assert!(convo
            .iter()
            .enumerate()
            .all(|(i, t)| t.role() == if i % 2 == 0 { Role::User } else { Role::Model }));
    }

    #[tokio::test]
    async fn gateway_sees_capped_history() {
        let replies = (0..15).map(|i| ScriptedReply::Text(format!("r{i}"))).collect();
        let (coordinator, gateway, id) = connected(replies);

        for i in 0..15 {
            let _ = coordinator.handle_chat(&id, format!("p{i}").as_str()).await;
        }

        let last_call = gateway.calls().pop().unwrap();
        assert_eq!(last_call.len(), 24);
        assert_eq!(last_call.last(), Some(&Turn::user("p14")));
    }

    #[tokio::test]
    async fn disconnect_during_generation_discards_result() {
        let gate = Arc::new(Notify::new());
        let (coordinator, gateway, id) = connected(vec![ScriptedReply::gated(
            Arc::clone(&gate),
            ScriptedReply::text("too late"),
        )]);

        let task = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.handle_chat(&id, "hello").await })
        };

        gateway.wait_for_call().await;
        coordinator.disconnect(&id, "client closed");
        gate.notify_one();

        assert_eq!(task.await.unwrap(), None);
        assert!(!coordinator.is_active(&id));
        assert!(coordinator.conversation(&id).await.is_none());
        assert_eq!(coordinator.session_count(), 0);
    }

    #[tokio::test]
    async fn chat_after_disconnect_is_ignored() {
        let (coordinator, gateway, id) = connected(vec![ScriptedReply::text("unused")]);
        coordinator.disconnect(&id, "transport closed");

        assert_eq!(coordinator.handle_chat(&id, "hello").await, None);
        assert_eq!(gateway.call_count(), 0);
        assert!(coordinator.conversation(&id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_connection_is_ignored() {
        let (coordinator, gateway) = coordinator(vec![ScriptedReply::text("unused")]);
        assert_eq!(coordinator.handle_chat(&ConnectionId::new(), "hello").await, None);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn overlapping_requests_are_serialized() {
        let gate = Arc::new(Notify::new());
        let (coordinator, gateway, id) = connected(vec![
            ScriptedReply::gated(Arc::clone(&gate), ScriptedReply::text("first reply")),
            ScriptedReply::text("second reply"),
        ]);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.handle_chat(&id, "first").await })
        };
        gateway.wait_for_call().await;

        let second = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.handle_chat(&id, "second").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(gateway.call_count(), 1);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), Some(ServerEvent::Reply("first reply".into())));
        assert_eq!(second.await.unwrap(), Some(ServerEvent::Reply("second reply".into())));

        let convo = coordinator.conversation(&id).await.unwrap();
        assert_eq!(
            convo,
            vec![
                Turn::user("first"),
                Turn::model("first reply"),
                Turn::user("second"),
                Turn::model("second reply"),
            ]
        );
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (coordinator, _) = coordinator(vec![
            ScriptedReply::failure(FailureCause::Network("reset".into())),
            ScriptedReply::text("fine"),
        ]);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        coordinator.connect(&a);
        coordinator.connect(&b);

        let _ = coordinator.handle_chat(&a, "from a").await;
        let event = coordinator.handle_chat(&b, "from b").await;
        assert_eq!(event, Some(ServerEvent::Reply("fine".into())));

        assert_eq!(coordinator.conversation(&a).await.unwrap(), vec![Turn::user("from a")]);
        assert_eq!(
            coordinator.conversation(&b).await.unwrap(),
            vec![Turn::user("from b"), Turn::model("fine")]
        );

        coordinator.disconnect(&a, "done");
        assert!(coordinator.is_active(&b));
        assert_eq!(coordinator.session_count(), 1);
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        tokio::time::pause();
        let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedReply::delayed(
            Duration::from_secs(120),
            ScriptedReply::text("never"),
        )]));
        let coordinator = SessionCoordinator::new(
            gateway,
            CoordinatorConfig {
                generation_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let id = ConnectionId::new();
        coordinator.connect(&id);

        let event = coordinator.handle_chat(&id, "hello").await;
        assert_eq!(
            event,
            Some(ServerEvent::Error("Failed to generate AI response.".into()))
        );
        assert_eq!(coordinator.conversation(&id).await.unwrap(), vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn custom_history_limit() {
        let replies = (0..3).map(|i| ScriptedReply::Text(format!("r{i}"))).collect();
        let gateway = Arc::new(ScriptedGateway::new(replies));
        let coordinator = SessionCoordinator::new(
            gateway,
            CoordinatorConfig {
                history_limit: 4,
                ..Default::default()
            },
        );
        let id = ConnectionId::new();
        coordinator.connect(&id);

        for i in 0..3 {
            let _ = coordinator.handle_chat(&id, format!("p{i}").as_str()).await;
        }
        let convo = coordinator.conversation(&id).await.unwrap();
        assert_eq!(convo.len(), 4);
        assert_eq!(convo[0], Turn::user("p1"));
    }

    #[test]
    fn reconnect_keeps_existing_session() {
        let (coordinator, _) = coordinator(vec![]);
        let id = ConnectionId::new();
        coordinator.connect(&id);
        coordinator.connect(&id);
        assert_eq!(coordinator.session_count(), 1);
    }
}
