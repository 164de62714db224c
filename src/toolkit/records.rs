//! Call records: per-invocation audit log and cooldown gate.
//!
//! Each tool call with side effects creates a `pending` record up front and
//! transitions it exactly once to `success`, `error`, or `timeout`. Terminal
//! transitions are conditional updates (`WHERE status = 'pending'`), so
//! concurrent writers never overwrite a terminal state and no global lock is
//! needed. The cooldown check is advisory: two concurrent callers can both
//! pass it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_core::database::{from_millis, AgentDatabase};

use super::errors::ToolError;
use super::types::ToolContext;

// ─── Types ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Success => "success",
            CallStatus::Error => "error",
            CallStatus::Timeout => "timeout",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallStatus::Pending),
            "success" => Some(CallStatus::Success),
            "error" => Some(CallStatus::Error),
            "timeout" => Some(CallStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != CallStatus::Pending
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: String,
    pub actor_id: String,
    pub project_id: String,
    pub conversation_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub params: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Call-record persistence over the shared agent database.
#[derive(Clone)]
pub struct CallRecordStore {
    db: AgentDatabase,
    timeout_bypasses_cooldown: bool,
}

impl CallRecordStore {
    pub fn new(db: AgentDatabase) -> Self {
        Self {
            db,
            timeout_bypasses_cooldown: true,
        }
    }

    /// Whether a `timeout` record inside the window lets the next call through.
    pub fn with_timeout_bypass(mut self, enabled: bool) -> Self {
        self.timeout_bypasses_cooldown = enabled;
        self
    }

    /// Insert a `pending` record for a call starting now.
    pub fn create(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        tool_name: &str,
        params: &serde_json::Value,
    ) -> Result<CallRecord, ToolError> {
        self.create_at(ctx, call_id, tool_name, params, Utc::now())
    }

    /// Insert a `pending` record stamped with `at`.
    pub fn create_at(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        tool_name: &str,
        params: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<CallRecord, ToolError> {
        ctx.require_complete()?;

        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            actor_id: ctx.actor_id.clone(),
            project_id: ctx.project_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            params: serde_json::to_string(params)?,
            result: None,
            error: None,
            status: CallStatus::Pending,
            created_at: at,
            updated_at: at,
        };

        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO function_calls
                (id, actor_id, project_id, conversation_id, call_id, tool_name,
                 params, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
            params![
                record.id,
                record.actor_id,
                record.project_id,
                record.conversation_id,
                record.call_id,
                record.tool_name,
                record.params,
                at.timestamp_millis(),
            ],
        )?;

        tracing::debug!(tool = %tool_name, call_id = %call_id, record_id = %record.id, "call record created");
        Ok(record)
    }

    /// Transition to `success`. Returns false if the record was already terminal.
    pub fn mark_success(&self, record_id: &str, result: &str) -> Result<bool, ToolError> {
        self.transition(record_id, CallStatus::Success, Some(result), None)
    }

    /// Transition to `error`. Returns false if the record was already terminal.
    pub fn mark_error(&self, record_id: &str, error: &str) -> Result<bool, ToolError> {
        self.transition(record_id, CallStatus::Error, None, Some(error))
    }

    /// Transition to `timeout`. Returns false if the record was already terminal.
    pub fn mark_timeout(&self, record_id: &str) -> Result<bool, ToolError> {
        self.transition(record_id, CallStatus::Timeout, None, None)
    }

    fn transition(
        &self,
        record_id: &str,
        status: CallStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, ToolError> {
        let conn = self.db.get_conn()?;
        // A result written mid-call is kept when the call later errors.
        let changed = conn.execute(
            "UPDATE function_calls
                SET status = ?2,
                    result = COALESCE(?3, result),
                    error = COALESCE(?4, error),
                    updated_at = ?5
              WHERE id = ?1 AND status = 'pending'",
            params![
                record_id,
                status.as_str(),
                result,
                error,
                Utc::now().timestamp_millis()
            ],
        )?;

        if changed == 0 {
            tracing::warn!(record_id = %record_id, status = %status, "call record already terminal, transition ignored");
        }
        Ok(changed == 1)
    }

    /// Fetch a record by id.
    pub fn get(&self, record_id: &str) -> Result<Option<CallRecord>, ToolError> {
        let conn = self.db.get_conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM function_calls WHERE id = ?1"),
                params![record_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent record for a (tool, actor, project) triple.
    pub fn get_latest(
        &self,
        tool_name: &str,
        actor_id: &str,
        project_id: &str,
    ) -> Result<Option<CallRecord>, ToolError> {
        let conn = self.db.get_conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM function_calls
                      WHERE tool_name = ?1 AND actor_id = ?2 AND project_id = ?3
                      ORDER BY created_at DESC, rowid DESC
                      LIMIT 1"
                ),
                params![tool_name, actor_id, project_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Cooldown gate evaluated at the current time.
    pub fn check_cooldown(
        &self,
        tool_name: &str,
        actor_id: &str,
        project_id: &str,
        window: Duration,
    ) -> Result<(), ToolError> {
        self.check_cooldown_at(tool_name, actor_id, project_id, window, Utc::now())
    }

    /// Cooldown gate evaluated at `now`.
    ///
    /// Inside the window, `success`, `pending`, and `error` records block;
    /// `timeout` records pass when the bypass is enabled. Past the window, a
    /// still-`pending` record is transitioned to `timeout`.
    pub fn check_cooldown_at(
        &self,
        tool_name: &str,
        actor_id: &str,
        project_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), ToolError> {
        let Some(record) = self.get_latest(tool_name, actor_id, project_id)? else {
            return Ok(());
        };

        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let expires_at = record.created_at.checked_add_signed(window);
        let in_window = expires_at.map_or(true, |t| t > now);

        if in_window {
            if record.status == CallStatus::Timeout && self.timeout_bypasses_cooldown {
                tracing::debug!(tool = %tool_name, "cooldown bypassed by timed-out record");
                return Ok(());
            }
            let remaining_ms = expires_at
                .map(|t| (t - now).num_milliseconds())
                .unwrap_or(i64::MAX);
            let remaining_secs = (remaining_ms.max(0) as u64).div_ceil(1000);
            tracing::info!(tool = %tool_name, status = %record.status, remaining_secs, "cooldown active");
            return Err(ToolError::CooldownActive {
                tool: tool_name.to_string(),
                status: record.status.to_string(),
                remaining_secs,
            });
        }

        if record.status == CallStatus::Pending {
            tracing::info!(tool = %tool_name, record_id = %record.id, "stale pending record marked timeout");
            self.mark_timeout(&record.id)?;
        }
        Ok(())
    }
}

const COLUMNS: &str = "id, actor_id, project_id, conversation_id, call_id, tool_name, \
                       params, result, error, status, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    let raw_status: String = row.get(9)?;
    let status = CallStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown call status '{raw_status}'").into(),
        )
    })?;
    Ok(CallRecord {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        project_id: row.get(2)?,
        conversation_id: row.get(3)?,
        call_id: row.get(4)?,
        tool_name: row.get(5)?,
        params: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
        status,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
