//! One chat turn: append the user message and a streaming placeholder, call the backend,
//! then reconcile the reply into the tab the turn started from.

use crate::api::{ApiError, ChatBackend, ChatReply, ChatRequest};
use crate::session::{SessionManager, TabPatch};
use crate::tab::{Message, ToolCall};

/// Turn that has been started but not yet reconciled.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub tab_id: String,
    pub placeholder_id: String,
    pub request: ChatRequest,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Answered,
    /// The error text was written into the placeholder.
    Failed(ApiError),
    /// The originating tab was closed or cleared while the request was in flight.
    Discarded,
}

/// Holds the loading flag. At most one turn is in flight per controller.
#[derive(Debug, Default)]
pub struct TurnController {
    loading: bool,
}

impl TurnController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Start a turn in the active tab. Returns `None` for blank input or while a turn is running.
    pub fn begin(
        &mut self,
        session: &mut SessionManager,
        text: &str,
        debug: bool,
    ) -> Option<PendingTurn> {
        if self.loading || text.trim().is_empty() {
            return None;
        }
        let tab = session.active_tab();
        let tab_id = tab.id.clone();
        let thread_id = tab.thread_id.clone();
        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        let mut messages = tab.messages.clone();
        messages.push(Message::user(text));
        messages.push(placeholder);
        session.update_tab(&tab_id, TabPatch::messages(messages));
        self.loading = true;
        log::debug!("turn started in tab {} (thread {:?})", tab_id, thread_id);
        Some(PendingTurn {
            tab_id,
            placeholder_id,
            request: ChatRequest {
                message: text.to_string(),
                thread_id,
                debug_mode: debug,
            },
        })
    }

    /// Write the result into the placeholder and clear the loading flag.
    pub fn finish(
        &mut self,
        session: &mut SessionManager,
        pending: PendingTurn,
        result: Result<ChatReply, ApiError>,
    ) -> TurnOutcome {
        self.loading = false;
        let Some(tab) = session.tab(&pending.tab_id) else {
            log::debug!("tab {} closed during turn; reply dropped", pending.tab_id);
            return TurnOutcome::Discarded;
        };
        if tab.message(&pending.placeholder_id).is_none() {
            log::debug!("tab {} cleared during turn; reply dropped", pending.tab_id);
            return TurnOutcome::Discarded;
        }
        let settle = |text: String, tool_calls: Option<Vec<ToolCall>>| {
            tab.messages
                .iter()
                .map(|m| {
                    if m.id == pending.placeholder_id {
                        Message {
                            text: text.clone(),
                            is_streaming: false,
                            tool_calls: tool_calls.clone(),
                            ..m.clone()
                        }
                    } else {
                        m.clone()
                    }
                })
                .collect::<Vec<_>>()
        };
        match result {
            Ok(reply) => {
                let tool_calls = if reply.tool_calls.is_empty() {
                    None
                } else {
                    Some(reply.tool_calls.clone())
                };
                let messages = settle(reply.answer, tool_calls);
                let patch = TabPatch {
                    messages: Some(messages),
                    thread_id: Some(reply.thread_id),
                    tool_calls: Some(reply.tool_calls),
                    debug_info: Some(reply.debug_info),
                };
                session.update_tab(&pending.tab_id, patch);
                TurnOutcome::Answered
            }
            Err(e) => {
                log::error!("chat turn failed: {}", e);
                let text = format!("I'm sorry, I encountered an error: {}. Please try again.", e);
                let messages = settle(text, None);
                session.update_tab(&pending.tab_id, TabPatch::messages(messages));
                TurnOutcome::Failed(e)
            }
        }
    }

    /// begin, call the backend, finish. Returns `None` when the turn was rejected.
    pub async fn send_turn<B: ChatBackend + ?Sized>(
        &mut self,
        session: &mut SessionManager,
        backend: &B,
        text: &str,
        debug: bool,
    ) -> Option<TurnOutcome> {
        let pending = self.begin(session, text, debug)?;
        let request = pending.request.clone();
        let mut guard = FinishOnDrop {
            controller: self,
            session,
            pending: Some(pending),
        };
        let result = backend.send_chat(&request).await;
        match guard.pending.take() {
            Some(pending) => Some(guard.controller.finish(guard.session, pending, result)),
            None => None,
        }
    }
}

/// Settles an abandoned turn when `send_turn`'s future is dropped mid-request.
struct FinishOnDrop<'a> {
    controller: &'a mut TurnController,
    session: &'a mut SessionManager,
    pending: Option<PendingTurn>,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.controller
                .finish(self.session, pending, Err(ApiError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TabStorage};
    use crate::tab::{DebugInfo, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBackend {
        reply: Mutex<Option<Result<ChatReply, ApiError>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl FakeBackend {
        fn answering(reply: ChatReply) -> Self {
            Self {
                reply: Mutex::new(Some(Ok(reply))),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                reply: Mutex::new(Some(Err(ApiError::Api(msg.to_string())))),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ApiError::Api("no reply queued".to_string())))
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl ChatBackend for HangingBackend {
        async fn send_chat(&self, _request: &ChatRequest) -> Result<ChatReply, ApiError> {
            std::future::pending().await
        }
    }

    fn session() -> SessionManager {
        SessionManager::open(TabStorage::new(Box::new(MemoryStore::new())))
    }

    fn reply(answer: &str, thread: &str) -> ChatReply {
        ChatReply {
            answer: answer.to_string(),
            thread_id: Some(thread.to_string()),
            tool_calls: Vec::new(),
            debug_info: None,
        }
    }

    #[tokio::test]
    async fn successful_turn_appends_exchange() {
        let mut s = session();
        let mut c = TurnController::new();
        let backend = FakeBackend::answering(reply("hi", "t1"));
        let outcome = c.send_turn(&mut s, &backend, "hello", false).await;
        assert!(matches!(outcome, Some(TurnOutcome::Answered)));
        assert!(!c.is_loading());

        let tab = s.active_tab();
        assert_eq!(tab.messages.len(), 3);
        assert_eq!(tab.messages[1].role, Role::User);
        assert_eq!(tab.messages[1].text, "hello");
        assert_eq!(tab.messages[2].role, Role::Model);
        assert_eq!(tab.messages[2].text, "hi");
        assert!(!tab.messages[2].is_streaming);
        assert!(tab.messages[2].tool_calls.is_none());
        assert_eq!(tab.thread_id.as_deref(), Some("t1"));

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].message, "hello");
        assert_eq!(seen[0].thread_id, None);
    }

    #[tokio::test]
    async fn second_turn_carries_thread_id() {
        let mut s = session();
        let mut c = TurnController::new();
        c.send_turn(&mut s, &FakeBackend::answering(reply("hi", "t1")), "hello", false)
            .await;
        let backend = FakeBackend::answering(reply("again", "t1"));
        c.send_turn(&mut s, &backend, "more", true).await;
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].thread_id.as_deref(), Some("t1"));
        assert!(seen[0].debug_mode);
        assert_eq!(s.active_tab().messages.len(), 5);
    }

    #[tokio::test]
    async fn failed_turn_writes_error_and_keeps_thread() {
        let mut s = session();
        let mut c = TurnController::new();
        c.send_turn(&mut s, &FakeBackend::answering(reply("hi", "t1")), "hello", false)
            .await;
        let outcome = c
            .send_turn(&mut s, &FakeBackend::failing("boom"), "again", false)
            .await;
        assert!(matches!(outcome, Some(TurnOutcome::Failed(_))));
        assert!(!c.is_loading());
        let tab = s.active_tab();
        let last = tab.messages.last().unwrap();
        assert!(last.text.contains("boom"));
        assert!(last.text.starts_with("I'm sorry, I encountered an error"));
        assert!(!last.is_streaming);
        assert_eq!(tab.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn reply_tool_calls_land_on_message_and_tab() {
        let mut s = session();
        let mut c = TurnController::new();
        let call = ToolCall {
            name: "get_projects".to_string(),
            args: serde_json::Map::new(),
            mcp: None,
            schema: None,
        };
        let mut r = reply("done", "t9");
        r.tool_calls = vec![call.clone()];
        r.debug_info = Some(DebugInfo {
            model_responses: vec!["raw".to_string()],
            ..DebugInfo::default()
        });
        c.send_turn(&mut s, &FakeBackend::answering(r), "projects?", true)
            .await;
        let tab = s.active_tab();
        assert_eq!(tab.tool_calls, vec![call.clone()]);
        assert_eq!(tab.messages[2].tool_calls.as_deref(), Some(&[call][..]));
        assert_eq!(tab.debug_info.as_ref().unwrap().model_responses, vec!["raw"]);
    }

    #[test]
    fn begin_rejects_blank_and_concurrent_turns() {
        let mut s = session();
        let mut c = TurnController::new();
        assert!(c.begin(&mut s, "   ", false).is_none());
        assert_eq!(s.active_tab().messages.len(), 1);

        let first = c.begin(&mut s, "one", false).unwrap();
        assert!(c.is_loading());
        assert!(c.begin(&mut s, "two", false).is_none());
        assert_eq!(s.active_tab().messages.len(), 3);
        let placeholder = s.active_tab().message(&first.placeholder_id).unwrap();
        assert!(placeholder.is_streaming);
    }

    #[test]
    fn reply_for_closed_tab_is_discarded() {
        let mut s = session();
        let mut c = TurnController::new();
        let pending = c.begin(&mut s, "hello", false).unwrap();
        let origin = pending.tab_id.clone();
        s.new_tab();
        s.close_tab(&origin);
        let outcome = c.finish(&mut s, pending, Ok(reply("hi", "t1")));
        assert!(matches!(outcome, TurnOutcome::Discarded));
        assert!(!c.is_loading());
        assert!(s.active_tab().thread_id.is_none());
    }

    #[test]
    fn reply_lands_in_origin_tab_after_switch() {
        let mut s = session();
        let mut c = TurnController::new();
        let pending = c.begin(&mut s, "hello", false).unwrap();
        let origin = pending.tab_id.clone();
        let other = s.new_tab();
        c.finish(&mut s, pending, Ok(reply("hi", "t1")));
        assert_eq!(s.active_tab_id(), other);
        assert!(s.active_tab().is_fresh());
        let tab = s.tab(&origin).unwrap();
        assert_eq!(tab.messages[2].text, "hi");
        assert_eq!(tab.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn reply_for_cleared_tab_is_discarded() {
        let mut s = session();
        let mut c = TurnController::new();
        let pending = c.begin(&mut s, "hello", false).unwrap();
        s.clear_active_tab();
        let outcome = c.finish(&mut s, pending, Ok(reply("hi", "t1")));
        assert!(matches!(outcome, TurnOutcome::Discarded));
        assert!(s.active_tab().is_fresh());
    }

    #[tokio::test]
    async fn dropped_turn_is_settled() {
        let mut s = session();
        let mut c = TurnController::new();
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            c.send_turn(&mut s, &HangingBackend, "hello", false),
        )
        .await;
        assert!(res.is_err());
        assert!(!c.is_loading());
        let last = s.active_tab().messages.last().unwrap();
        assert!(!last.is_streaming);
        assert!(last.text.contains("abandoned"));
    }
}
