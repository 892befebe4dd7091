//! The conversation state machine.
//!
//! Every inbound message for a user runs inside that user's critical
//! section: the state is loaded, routed, handed to one agent, and saved once.
//! Sections for different users never wait on each other.

use crate::agents::{ExpenseAgent, GeneralAgent, ReminderAgent, SetupAgent};
use crate::handler::{Handler, Turn};
use crate::session::FlowSession;
use chrono::Utc;
use nudge_core::{
    config::FlowConfig,
    conversation::{AgentKind, ConversationMessage, ConversationState, Intent},
    error::{FlowError, NudgeError},
    flow::FlowKind,
    message::{IncomingMessage, OutgoingMessage},
    owner::Owner,
    traits::Classifier,
};
use nudge_scheduler::ReminderScheduler;
use nudge_store::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ABORT_WORDS: &[&str] = &["cancel", "stop", "abort", "never mind", "nevermind", "forget it"];

/// Where an inbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Hand the message to `agent`. `intent` is set only when the message
    /// was classified.
    Handler {
        agent: AgentKind,
        intent: Option<Intent>,
    },
    /// The message aborted the active flow.
    Aborted(FlowKind),
}

/// Routes inbound messages to agents and owns every write to conversation
/// state.
pub struct FlowController {
    store: Store,
    classifier: Arc<dyn Classifier>,
    handlers: Vec<Arc<dyn Handler>>,
    /// One mutex per user with a section in progress.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: FlowConfig,
}

impl FlowController {
    /// Controller with the standard agents.
    pub fn new(
        scheduler: ReminderScheduler,
        classifier: Arc<dyn Classifier>,
        config: FlowConfig,
    ) -> Self {
        let store = scheduler.store().clone();
        let mut handlers: Vec<Arc<dyn Handler>> = vec![
            Arc::new(SetupAgent::new(store.clone())),
            Arc::new(ReminderAgent::new(scheduler)),
            Arc::new(ExpenseAgent::new()),
        ];
        let capabilities = handlers
            .iter()
            .filter(|h| h.agent() != AgentKind::Setup)
            .map(|h| h.describe())
            .collect();
        handlers.push(Arc::new(GeneralAgent::new(capabilities)));

        Self {
            store,
            classifier,
            handlers,
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process one inbound message and return the reply.
    pub async fn handle_message(
        &self,
        message: &IncomingMessage,
    ) -> Result<OutgoingMessage, NudgeError> {
        let owner = self
            .store
            .ensure_owner(
                &message.sender_id,
                &message.reply_target,
                self.config.default_utc_offset_minutes,
            )
            .await?;
        let owner_id = owner.id.clone();

        let lock = self.lock_for(&owner_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.process(owner, &message.text).await
        };
        self.release(&owner_id, lock).await;

        if let Err(e) = &result {
            warn!("flow: message from {owner_id} failed: {e}");
        }
        result
    }

    async fn process(&self, owner: Owner, text: &str) -> Result<OutgoingMessage, NudgeError> {
        let now = Utc::now();
        let owner_id = owner.id.clone();
        let mut state = self.store.conversation_state(&owner_id).await?;
        let history = self
            .store
            .recent_messages(&owner_id, self.config.history_window)
            .await?;

        let mut session = FlowSession::new(&mut state);
        let route = self.decide(&mut session, &owner, text, &history).await?;

        let mut inbound = ConversationMessage::inbound(&owner_id, text);
        if let Route::Handler {
            intent: Some(intent),
            ..
        } = route
        {
            inbound = inbound.with_intent(intent.as_str());
        }
        self.store.append_message(&inbound).await?;

        let mut reply = match route {
            Route::Aborted(flow) => {
                info!("flow: {owner_id} aborted {flow}");
                OutgoingMessage::text("Okay, I've stopped that. What next?")
            }
            Route::Handler { agent, intent } => {
                let handler = self.handler(agent)?;
                let mut turn = Turn {
                    owner,
                    text,
                    intent,
                    now,
                    session,
                };
                let mut reply = handler.handle(&mut turn).await?;
                reply.metadata.detected_intent = intent.map(|i| i.as_str().to_string());
                reply
            }
        };
        reply.metadata.agent = state
            .current_agent()
            .map_or("none", |a| a.as_str())
            .to_string();

        self.store.save_conversation_state(&mut state).await?;

        let mut outbound = ConversationMessage::outbound(&owner_id, &reply.text);
        if let Some(intent) = &reply.metadata.detected_intent {
            outbound = outbound.with_intent(intent);
        }
        if let Some(id) = &reply.metadata.related_reminder_id {
            outbound = outbound.with_reminder(id);
        }
        if let Some(data) = state.flow_data() {
            outbound = outbound.with_extracted(data.to_value()?);
        }
        self.store.append_message(&outbound).await?;

        Ok(reply)
    }

    /// Pick the handler for `text` and record the owning agent on the state.
    async fn decide(
        &self,
        session: &mut FlowSession<'_>,
        owner: &Owner,
        text: &str,
        history: &[ConversationMessage],
    ) -> Result<Route, NudgeError> {
        if !owner.setup_complete {
            if session.current_agent() != Some(AgentKind::Setup) {
                session.switch_agent(AgentKind::Setup, None)?;
            }
            return Ok(Route::Handler {
                agent: AgentKind::Setup,
                intent: None,
            });
        }

        if let (Some(flow), Some(agent)) = (session.active_flow(), session.current_agent()) {
            if flow != FlowKind::Setup && is_abort(text) {
                session.complete_flow();
                return Ok(Route::Aborted(flow));
            }
            debug!("flow: {} continues {flow} with {agent}", owner.id);
            return Ok(Route::Handler {
                agent,
                intent: None,
            });
        }

        let intent = self.classifier.classify(text, history).await;
        let agent = self
            .handlers
            .iter()
            .find(|h| h.can_handle(intent))
            .map_or(AgentKind::General, |h| h.agent());
        if session.current_agent() != Some(agent) {
            debug!(
                "flow: {} routed to {agent} ({})",
                owner.id,
                intent.as_str()
            );
            session.assign_agent(agent);
        }
        Ok(Route::Handler {
            agent,
            intent: Some(intent),
        })
    }

    fn handler(&self, agent: AgentKind) -> Result<&Arc<dyn Handler>, NudgeError> {
        self.handlers
            .iter()
            .find(|h| h.agent() == agent)
            .ok_or_else(|| NudgeError::Config(format!("no handler registered for {agent}")))
    }

    /// Decide where `text` from `owner` would go and persist the agent
    /// assignment, without running the handler.
    pub async fn route(&self, owner: &Owner, text: &str) -> Result<Route, NudgeError> {
        let history = self
            .store
            .recent_messages(&owner.id, self.config.history_window)
            .await?;
        let lock = self.lock_for(&owner.id).await;
        let result = async {
            let _guard = lock.lock().await;
            let mut state = self.store.conversation_state(&owner.id).await?;
            let route = self
                .decide(&mut FlowSession::new(&mut state), owner, text, &history)
                .await?;
            self.store.save_conversation_state(&mut state).await?;
            Ok::<_, NudgeError>(route)
        }
        .await;
        self.release(&owner.id, lock).await;
        result
    }

    /// Start `kind` for the user. Rejected while another flow is active.
    pub async fn start_flow(
        &self,
        owner_id: &str,
        kind: FlowKind,
        initial: Value,
    ) -> Result<(), NudgeError> {
        self.with_session(owner_id, |session| session.start_flow(kind, initial))
            .await
    }

    /// Merge `partial` into the active flow's data. `Ok(false)` when no flow
    /// is active.
    pub async fn update_flow_data(&self, owner_id: &str, partial: Value) -> Result<bool, NudgeError> {
        self.with_session(owner_id, |session| session.update_flow_data(partial))
            .await
    }

    /// Clear the active flow and its data. `Ok(false)` when no flow is active.
    pub async fn complete_flow(&self, owner_id: &str) -> Result<bool, NudgeError> {
        self.with_session(owner_id, |session| Ok(session.complete_flow()))
            .await
    }

    pub async fn switch_agent(
        &self,
        owner_id: &str,
        agent: AgentKind,
        flow: Option<(FlowKind, Value)>,
    ) -> Result<(), NudgeError> {
        self.with_session(owner_id, |session| session.switch_agent(agent, flow))
            .await
    }

    /// The user's persisted state (fresh if none was ever saved).
    pub async fn state(&self, owner_id: &str) -> Result<ConversationState, NudgeError> {
        self.store.conversation_state(owner_id).await
    }

    /// Run `apply` on the user's state inside its critical section and save.
    async fn with_session<T, F>(&self, owner_id: &str, apply: F) -> Result<T, NudgeError>
    where
        F: FnOnce(&mut FlowSession<'_>) -> Result<T, FlowError>,
    {
        let lock = self.lock_for(owner_id).await;
        let result = async {
            let _guard = lock.lock().await;
            let mut state = self.store.conversation_state(owner_id).await?;
            let value = apply(&mut FlowSession::new(&mut state))?;
            self.store.save_conversation_state(&mut state).await?;
            Ok::<_, NudgeError>(value)
        }
        .await;
        self.release(owner_id, lock).await;
        result
    }

    async fn lock_for(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(owner_id.to_string()).or_default().clone()
    }

    /// Drop the caller's handle and forget the mutex if nobody else holds it.
    async fn release(&self, owner_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().await;
        if locks
            .get(owner_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(owner_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn is_abort(text: &str) -> bool {
    let text = text
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!'))
        .to_lowercase();
    ABORT_WORDS.contains(&text.as_str())
}
