//! Per-user conversation state with optimistic versioning.
//!
//! A write only succeeds against the version it was read at. The flow
//! controller serializes writers per user in-process; the version check
//! catches writers in other processes.

use super::Store;
use crate::timestamp::{format_ts, parse_ts};
use chrono::Utc;
use nudge_core::{
    conversation::{AgentKind, ConversationState},
    error::{FlowError, NudgeError},
    flow::{FlowData, FlowKind},
};

type StateRow = (Option<String>, Option<String>, Option<String>, i64, String);

impl Store {
    /// Load the state for `owner_id`, if one was ever saved.
    pub async fn load_conversation_state(
        &self,
        owner_id: &str,
    ) -> Result<Option<ConversationState>, NudgeError> {
        let row: Option<StateRow> = sqlx::query_as(
            "SELECT current_agent, active_flow, flow_data, version, last_updated \
             FROM conversation_state WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NudgeError::Store(format!("load conversation state failed: {e}")))?;

        let Some((agent, flow, data, version, last_updated)) = row else {
            return Ok(None);
        };

        let agent = agent.map(|a| a.parse::<AgentKind>()).transpose()?;
        let flow = match (flow, data) {
            (Some(kind), data) => {
                let kind: FlowKind = kind.parse()?;
                let value: serde_json::Value = match data {
                    Some(text) => serde_json::from_str(&text)?,
                    None => serde_json::Value::Null,
                };
                Some(FlowData::from_parts(kind, value)?)
            }
            (None, _) => None,
        };

        let state = ConversationState::restore(
            owner_id.to_string(),
            agent,
            flow,
            version,
            parse_ts(&last_updated)?,
        )?;
        Ok(Some(state))
    }

    /// Load the state for `owner_id`, or a fresh unsaved one.
    pub async fn conversation_state(&self, owner_id: &str) -> Result<ConversationState, NudgeError> {
        Ok(self
            .load_conversation_state(owner_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(owner_id)))
    }

    /// Persist `state` if nobody else wrote since it was read.
    ///
    /// Agent, flow name, and flow data are written in one statement, so a
    /// cleared flow never leaves data behind.
    pub async fn save_conversation_state(
        &self,
        state: &mut ConversationState,
    ) -> Result<(), NudgeError> {
        let now = Utc::now();
        let agent = state.current_agent().map(|a| a.as_str());
        let flow = state.active_flow().map(|f| f.as_str());
        let data = state
            .flow_data()
            .map(|d| d.to_value().map(|v| v.to_string()))
            .transpose()?;
        let next_version = state.version() + 1;

        let result = if state.version() == 0 {
            sqlx::query(
                "INSERT INTO conversation_state \
                 (owner_id, current_agent, active_flow, flow_data, version, last_updated) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(owner_id) DO NOTHING",
            )
            .bind(state.owner_id())
            .bind(agent)
            .bind(flow)
            .bind(&data)
            .bind(next_version)
            .bind(format_ts(now))
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE conversation_state \
                 SET current_agent = ?, active_flow = ?, flow_data = ?, version = ?, last_updated = ? \
                 WHERE owner_id = ? AND version = ?",
            )
            .bind(agent)
            .bind(flow)
            .bind(&data)
            .bind(next_version)
            .bind(format_ts(now))
            .bind(state.owner_id())
            .bind(state.version())
            .execute(&self.pool)
            .await
        }
        .map_err(|e| NudgeError::Store(format!("save conversation state failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(FlowError::StaleState {
                owner_id: state.owner_id().to_string(),
            }
            .into());
        }

        state.mark_saved(next_version, now);
        Ok(())
    }
}
