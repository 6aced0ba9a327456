//! Turns phase messages into verdict actions.
//!
//! # Responsibilities
//! - Map message names to phases
//! - Resolve the application at request phase and capture it
//! - Pair the response phase with its stored request state
//! - Encode verdicts as transaction-scoped `set-var` actions

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::application::{Application, ApplicationRegistry};
use crate::config::MessagesConfig;
use crate::engine::{arg_str, Arguments, ErrorCode, Phase, Verdict, VerdictAction};
use crate::observability::metrics;
use crate::protocol::{Action, Message, TypedValue};
use crate::transaction::table::{CorrelationEntry, CorrelationTable};

/// Message argument naming the application.
pub const ARG_APP: &str = "app";
/// Message argument echoing the correlation id at response phase.
pub const ARG_ID: &str = "id";

pub const VAR_ACTION: &str = "action";
pub const VAR_STATUS: &str = "status";
pub const VAR_DATA: &str = "data";
pub const VAR_ERROR: &str = "error";
pub const VAR_ID: &str = "id";

/// Encode a verdict as ack actions.
///
/// `action` is unset when the verdict carries no action and `data` when it
/// is empty, so values from an earlier phase never linger on the proxy.
/// `status` and `error` are always set.
pub fn verdict_actions(verdict: &Verdict, id: Option<&str>) -> Vec<Action> {
    let mut actions = Vec::with_capacity(5);
    if verdict.action == VerdictAction::None {
        actions.push(Action::unset_txn(VAR_ACTION));
    } else {
        actions.push(Action::set_txn(VAR_ACTION, verdict.action.as_str()));
    }
    actions.push(Action::set_txn(VAR_STATUS, TypedValue::Int32(i32::from(verdict.status))));
    if verdict.data.is_empty() {
        actions.push(Action::unset_txn(VAR_DATA));
    } else {
        actions.push(Action::set_txn(VAR_DATA, verdict.data.as_str()));
    }
    actions.push(Action::set_txn(VAR_ERROR, TypedValue::Int32(verdict.error.code())));
    if let Some(id) = id {
        actions.push(Action::set_txn(VAR_ID, id));
    }
    actions
}

/// Combine the stored request verdict with the response verdict.
///
/// A response verdict without an action keeps the request verdict; any
/// explicit action, including `allow`, replaces it.
fn merge(stored: Verdict, response: Verdict) -> Verdict {
    if response.action == VerdictAction::None && !response.is_error() {
        stored
    } else {
        response
    }
}

/// Per-session (or agent-wide) transaction correlator.
#[derive(Debug, Clone)]
pub struct Correlator {
    registry: Arc<ApplicationRegistry>,
    table: CorrelationTable,
    messages: MessagesConfig,
    processing_timeout: Duration,
}

impl Correlator {
    pub fn new(
        registry: Arc<ApplicationRegistry>,
        table: CorrelationTable,
        messages: MessagesConfig,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            table,
            messages,
            processing_timeout,
        }
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    pub fn phase_of(&self, message: &str) -> Option<Phase> {
        if message == self.messages.request {
            Some(Phase::Request)
        } else if message == self.messages.response {
            Some(Phase::Response)
        } else {
            None
        }
    }

    /// Handle one notify message. Unknown messages yield no actions.
    pub async fn handle(&self, message: &Message) -> Vec<Action> {
        match self.phase_of(&message.name) {
            Some(Phase::Request) => self.request(&message.args).await,
            Some(Phase::Response) => self.response(&message.args).await,
            None => {
                tracing::debug!(message = %message.name, "Ignoring unknown message");
                Vec::new()
            }
        }
    }

    async fn request(&self, args: &Arguments) -> Vec<Action> {
        let app_name = arg_str(args, ARG_APP).unwrap_or_default();
        let app = match self.registry.resolve(&app_name) {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!(app = %app_name, error = %e, "Application resolution failed");
                metrics::record_error("resolution");
                return verdict_actions(&Verdict::error(ErrorCode::Configuration), None);
            }
        };

        let started_at = Instant::now();
        let verdict = self.evaluate(&app, Phase::Request, args).await;

        let id = Uuid::new_v4().to_string();
        let ttl = app.transaction_ttl().unwrap_or(self.processing_timeout);
        tracing::debug!(
            app = app.name(),
            correlation_id = %id,
            action = verdict.action.as_str(),
            error = verdict.error.as_str(),
            "Request phase evaluated"
        );

        let actions = verdict_actions(&verdict, Some(&id));
        self.table.insert(
            id,
            CorrelationEntry {
                application: app,
                verdict,
                started_at,
                expires_at: started_at + ttl,
            },
        );
        actions
    }

    async fn response(&self, args: &Arguments) -> Vec<Action> {
        let id = arg_str(args, ARG_ID).map(|id| id.into_owned());
        let Some(entry) = id.as_deref().and_then(|id| self.table.take(id)) else {
            tracing::warn!(
                correlation_id = id.as_deref().unwrap_or(""),
                "Response phase without a live transaction"
            );
            metrics::record_error("unknown_transaction");
            return verdict_actions(&Verdict::error(ErrorCode::UnknownTransaction), None);
        };

        let app = entry.application;
        let verdict = if app.response_check() {
            let response = self.evaluate(&app, Phase::Response, args).await;
            merge(entry.verdict, response)
        } else {
            entry.verdict
        };

        tracing::debug!(
            app = app.name(),
            correlation_id = id.as_deref().unwrap_or(""),
            action = verdict.action.as_str(),
            error = verdict.error.as_str(),
            elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
            "Response phase evaluated"
        );

        verdict_actions(&verdict, None)
    }

    async fn evaluate(&self, app: &Application, phase: Phase, args: &Arguments) -> Verdict {
        let started = Instant::now();
        let verdict = match app.evaluate(phase, args).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(app = app.name(), phase = %phase, error = %e, "Evaluation failed");
                metrics::record_error("evaluation");
                Verdict::error(ErrorCode::Evaluation)
            }
        };
        metrics::record_evaluation(phase, started);
        metrics::record_verdict(app.name(), phase, verdict.action);
        verdict
    }
}
