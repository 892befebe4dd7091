//! Flow operations on one user's state while its lock is held.

use nudge_core::{
    conversation::{AgentKind, ConversationState},
    error::FlowError,
    flow::{FlowData, FlowKind},
};
use serde_json::Value;
use tracing::{debug, warn};

/// Mutable view of a user's conversation state inside a critical section.
///
/// Changes are applied in memory; the controller persists them once the
/// section ends.
pub struct FlowSession<'a> {
    state: &'a mut ConversationState,
}

impl<'a> FlowSession<'a> {
    pub(crate) fn new(state: &'a mut ConversationState) -> Self {
        Self { state }
    }

    pub fn owner_id(&self) -> &str {
        self.state.owner_id()
    }

    pub fn current_agent(&self) -> Option<AgentKind> {
        self.state.current_agent()
    }

    pub fn active_flow(&self) -> Option<FlowKind> {
        self.state.active_flow()
    }

    pub fn flow_data(&self) -> Option<&FlowData> {
        self.state.flow_data()
    }

    /// Start `kind` seeded with `initial`. Fails if a flow is already active
    /// or no agent owns the user.
    pub fn start_flow(&mut self, kind: FlowKind, initial: Value) -> Result<(), FlowError> {
        let data = FlowData::from_parts(kind, initial)?;
        self.state.begin_flow(data)?;
        debug!("flow: {} started {kind}", self.state.owner_id());
        Ok(())
    }

    /// Merge `partial` into the active flow's data. Warns and returns
    /// `false` when no flow is active.
    pub fn update_flow_data(&mut self, partial: Value) -> Result<bool, FlowError> {
        let merged = self.state.merge_flow_data(partial)?;
        if !merged {
            warn!(
                "flow: update for {} ignored, no active flow",
                self.state.owner_id()
            );
        }
        Ok(merged)
    }

    /// Replace the active flow's data with a typed value of the same flow.
    pub fn set_flow_data(&mut self, data: FlowData) -> Result<bool, FlowError> {
        self.state.set_flow_data(data)
    }

    /// Clear the active flow and its data. Warns and returns `false` when no
    /// flow is active.
    pub fn complete_flow(&mut self) -> bool {
        let kind = self.state.active_flow();
        let cleared = self.state.clear_flow();
        match kind {
            Some(kind) => debug!("flow: {} completed {kind}", self.state.owner_id()),
            None => warn!(
                "flow: complete for {} ignored, no active flow",
                self.state.owner_id()
            ),
        }
        cleared
    }

    /// Hand the user to `agent`, dropping any active flow, then optionally
    /// start `flow` under the new agent.
    pub fn switch_agent(
        &mut self,
        agent: AgentKind,
        flow: Option<(FlowKind, Value)>,
    ) -> Result<(), FlowError> {
        let data = flow
            .map(|(kind, initial)| FlowData::from_parts(kind, initial))
            .transpose()?;
        let previous = self.state.current_agent();
        self.state.switch_agent(agent, data)?;
        if previous != Some(agent) {
            debug!(
                "flow: {} switched {} -> {agent}",
                self.state.owner_id(),
                previous.map_or("none", |a| a.as_str())
            );
        }
        Ok(())
    }

    pub(crate) fn assign_agent(&mut self, agent: AgentKind) {
        self.state.assign_agent(agent);
    }
}
