//! Named multi-turn flows and the typed data each one accumulates.
//!
//! Flow data is persisted as a JSON object but always validated against the
//! schema of its flow. Partial updates are merged key by key and re-validated,
//! so a stored accumulator never holds fields another flow would write.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

/// Every multi-step exchange the flow controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Setup,
    CreateReminder,
    CancelReminder,
    SplitExpense,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::CreateReminder => "create_reminder",
            Self::CancelReminder => "cancel_reminder",
            Self::SplitExpense => "split_expense",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(Self::Setup),
            "create_reminder" => Ok(Self::CreateReminder),
            "cancel_reminder" => Ok(Self::CancelReminder),
            "split_expense" => Ok(Self::SplitExpense),
            other => Err(FlowError::Unknown {
                what: "flow",
                name: other.to_string(),
            }),
        }
    }
}

/// Setup collects how to address the owner and which clock they live on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetupData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateReminderData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// The message that started the request, kept as reminder metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Set once the owner has been asked to confirm.
    #[serde(default)]
    pub confirming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CancelReminderData {
    /// Reminder ids in the order they were listed to the owner.
    #[serde(default)]
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SplitExpenseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Accumulated data of an active flow, tagged by the flow it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowData {
    Setup(SetupData),
    CreateReminder(CreateReminderData),
    CancelReminder(CancelReminderData),
    SplitExpense(SplitExpenseData),
}

impl FlowData {
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Setup(_) => FlowKind::Setup,
            Self::CreateReminder(_) => FlowKind::CreateReminder,
            Self::CancelReminder(_) => FlowKind::CancelReminder,
            Self::SplitExpense(_) => FlowKind::SplitExpense,
        }
    }

    /// An empty accumulator for `kind`.
    pub fn empty(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Setup => Self::Setup(SetupData::default()),
            FlowKind::CreateReminder => Self::CreateReminder(CreateReminderData::default()),
            FlowKind::CancelReminder => Self::CancelReminder(CancelReminderData::default()),
            FlowKind::SplitExpense => Self::SplitExpense(SplitExpenseData::default()),
        }
    }

    /// Validate a raw JSON object against the schema of `kind`.
    pub fn from_parts(kind: FlowKind, value: Value) -> Result<Self, FlowError> {
        let value = match value {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => value,
            other => {
                return Err(invalid(kind, format!("expected an object, got {other}")));
            }
        };
        Ok(match kind {
            FlowKind::Setup => Self::Setup(parse(kind, value)?),
            FlowKind::CreateReminder => Self::CreateReminder(parse(kind, value)?),
            FlowKind::CancelReminder => Self::CancelReminder(parse(kind, value)?),
            FlowKind::SplitExpense => Self::SplitExpense(parse(kind, value)?),
        })
    }

    /// The accumulator as a JSON object.
    pub fn to_value(&self) -> Result<Value, FlowError> {
        let value = match self {
            Self::Setup(d) => serde_json::to_value(d),
            Self::CreateReminder(d) => serde_json::to_value(d),
            Self::CancelReminder(d) => serde_json::to_value(d),
            Self::SplitExpense(d) => serde_json::to_value(d),
        };
        value.map_err(|e| invalid(self.kind(), e.to_string()))
    }

    /// Merge `partial` over the current data and re-validate.
    ///
    /// Keys in `partial` overwrite existing keys; `null` clears an optional
    /// field. Unknown keys are rejected.
    pub fn merge(&self, partial: Value) -> Result<Self, FlowError> {
        let Value::Object(partial) = partial else {
            return Err(invalid(self.kind(), "partial data must be an object".into()));
        };
        let mut merged = match self.to_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in partial {
            merged.insert(key, value);
        }
        Self::from_parts(self.kind(), Value::Object(merged))
    }
}

fn parse<T: DeserializeOwned>(kind: FlowKind, value: Value) -> Result<T, FlowError> {
    serde_json::from_value(value).map_err(|e| invalid(kind, e.to_string()))
}

fn invalid(kind: FlowKind, reason: String) -> FlowError {
    FlowError::InvalidFlowData {
        flow: kind.as_str().to_string(),
        reason,
    }
}
