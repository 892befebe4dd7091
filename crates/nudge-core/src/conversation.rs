//! Per-user conversation state and the append-only conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;
use crate::flow::{FlowData, FlowKind};

/// Logical handler that currently owns a user's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Setup,
    Reminder,
    Expense,
    General,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Reminder => "reminder",
            Self::Expense => "expense",
            Self::General => "general",
        }
    }

    /// The agent that serves a classified intent.
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::CreateReminder | Intent::ListReminders | Intent::CancelReminder => {
                Self::Reminder
            }
            Intent::SplitExpense => Self::Expense,
            Intent::SmallTalk => Self::General,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(Self::Setup),
            "reminder" => Ok(Self::Reminder),
            "expense" => Ok(Self::Expense),
            "general" => Ok(Self::General),
            other => Err(FlowError::Unknown {
                what: "agent",
                name: other.to_string(),
            }),
        }
    }
}

/// What an inbound message asks for, as decided by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateReminder,
    ListReminders,
    CancelReminder,
    SplitExpense,
    SmallTalk,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateReminder => "create_reminder",
            Self::ListReminders => "list_reminders",
            Self::CancelReminder => "cancel_reminder",
            Self::SplitExpense => "split_expense",
            Self::SmallTalk => "small_talk",
        }
    }
}

/// Which handler owns a user and which flow, if any, is in progress.
///
/// Fields are private: every mutation goes through methods that keep two
/// invariants. A flow never exists without an agent, and the flow name and
/// its data are one value, so clearing the flow clears the data with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    owner_id: String,
    current_agent: Option<AgentKind>,
    flow: Option<FlowData>,
    version: i64,
    last_updated: DateTime<Utc>,
}

impl ConversationState {
    /// A fresh, never-persisted state with no agent.
    pub fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            current_agent: None,
            flow: None,
            version: 0,
            last_updated: Utc::now(),
        }
    }

    /// Rebuild a state read from storage.
    pub fn restore(
        owner_id: String,
        current_agent: Option<AgentKind>,
        flow: Option<FlowData>,
        version: i64,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, FlowError> {
        if flow.is_some() && current_agent.is_none() {
            return Err(FlowError::NoAgentAssigned { owner_id });
        }
        Ok(Self {
            owner_id,
            current_agent,
            flow,
            version,
            last_updated,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn current_agent(&self) -> Option<AgentKind> {
        self.current_agent
    }

    pub fn active_flow(&self) -> Option<FlowKind> {
        self.flow.as_ref().map(FlowData::kind)
    }

    pub fn flow_data(&self) -> Option<&FlowData> {
        self.flow.as_ref()
    }

    /// Storage version this state was read at; 0 means never persisted.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Record a successful write.
    pub fn mark_saved(&mut self, version: i64, at: DateTime<Utc>) {
        self.version = version;
        self.last_updated = at;
    }

    /// Hand the user to `agent` without touching an active flow.
    pub fn assign_agent(&mut self, agent: AgentKind) {
        self.current_agent = Some(agent);
    }

    /// Start a flow. At most one flow may be active per user.
    pub fn begin_flow(&mut self, data: FlowData) -> Result<(), FlowError> {
        if self.current_agent.is_none() {
            return Err(FlowError::NoAgentAssigned {
                owner_id: self.owner_id.clone(),
            });
        }
        if let Some(active) = &self.flow {
            return Err(FlowError::FlowAlreadyActive {
                owner_id: self.owner_id.clone(),
                active: active.kind().to_string(),
            });
        }
        self.flow = Some(data);
        Ok(())
    }

    /// Merge `partial` into the active flow's data. Returns `false` when no
    /// flow is active.
    pub fn merge_flow_data(&mut self, partial: Value) -> Result<bool, FlowError> {
        let Some(current) = &self.flow else {
            return Ok(false);
        };
        self.flow = Some(current.merge(partial)?);
        Ok(true)
    }

    /// Replace the active flow's data with a value of the same flow.
    /// Returns `false` when no flow is active.
    pub fn set_flow_data(&mut self, data: FlowData) -> Result<bool, FlowError> {
        let Some(current) = &self.flow else {
            return Ok(false);
        };
        if current.kind() != data.kind() {
            return Err(FlowError::InvalidFlowData {
                flow: current.kind().to_string(),
                reason: format!("cannot store {} data", data.kind()),
            });
        }
        self.flow = Some(data);
        Ok(true)
    }

    /// Drop the active flow and its data. Returns `false` when none was active.
    pub fn clear_flow(&mut self) -> bool {
        self.flow.take().is_some()
    }

    /// Move the user to `agent`, abandoning any active flow and optionally
    /// starting a new one under the new agent.
    pub fn switch_agent(
        &mut self,
        agent: AgentKind,
        flow: Option<FlowData>,
    ) -> Result<(), FlowError> {
        self.flow = None;
        self.current_agent = Some(agent);
        if let Some(data) = flow {
            self.begin_flow(data)?;
        }
        Ok(())
    }
}

/// Direction of a logged message relative to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// One entry in the append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub owner_id: String,
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub detected_intent: Option<String>,
    pub related_reminder_id: Option<String>,
    pub extracted_data: Option<Value>,
}

impl ConversationMessage {
    pub fn inbound(owner_id: &str, text: &str) -> Self {
        Self::new(owner_id, Direction::Inbound, text)
    }

    pub fn outbound(owner_id: &str, text: &str) -> Self {
        Self::new(owner_id, Direction::Outbound, text)
    }

    fn new(owner_id: &str, direction: Direction, text: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            direction,
            text: text.to_string(),
            timestamp: Utc::now(),
            detected_intent: None,
            related_reminder_id: None,
            extracted_data: None,
        }
    }

    pub fn with_intent(mut self, intent: &str) -> Self {
        self.detected_intent = Some(intent.to_string());
        self
    }

    pub fn with_reminder(mut self, reminder_id: &str) -> Self {
        self.related_reminder_id = Some(reminder_id.to_string());
        self
    }

    pub fn with_extracted(mut self, data: Value) -> Self {
        self.extracted_data = Some(data);
        self
    }
}
