//! Message dispatch for authenticated connections.
//!
//! Every message type maps to exactly one response message; transport
//! concerns (framing, size limits, handshake) live in the server module.

use std::sync::Arc;

use capsheet_engine::addr::parse_range;
use capsheet_oracle::extract::recover_ops;
use capsheet_oracle::prompts::{direct_command_prompt, render_sheet_sample};
use capsheet_oracle::{Oracle, OracleError};
use capsheet_protocol::*;

use crate::dialog::{self, ChatOutcome};
use crate::jobs::{self, JobState, JobStore};
use crate::session::SessionStore;

/// Shared daemon state, one instance per process, cloned into connection
/// threads.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub jobs: JobStore,
    pub oracle: Arc<dyn Oracle>,
}

impl AppState {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        AppState { sessions: SessionStore::new(), jobs: JobStore::new(), oracle }
    }
}

/// Map an oracle failure onto the wire error vocabulary.
fn oracle_error_code(e: &OracleError) -> ProtocolError {
    match e {
        OracleError::NotConfigured(_) | OracleError::NetworkError(_) => {
            ProtocolError::OracleUnavailable
        }
        OracleError::ApiError { .. } | OracleError::InvalidResponse(_) => ProtocolError::OracleError,
    }
}

/// Handle one post-handshake message.
pub fn handle_message(state: &AppState, msg: ClientMessage) -> ServerMessage {
    match msg {
        ClientMessage::Hello(h) => {
            // Repeated hello is a harmless re-handshake.
            ServerMessage::Welcome(WelcomeMessage {
                id: h.id,
                protocol_version: h.protocol_version.min(PROTOCOL_VERSION),
                capabilities: capabilities(),
            })
        }
        ClientMessage::Chat(chat) => handle_chat(state, chat),
        ClientMessage::SubmitPlan(submit) => handle_submit_plan(state, submit),
        ClientMessage::PollPlan(poll) => handle_poll_plan(state, poll),
        ClientMessage::CustomPlan(custom) => handle_custom_plan(state, custom),
        ClientMessage::Ping(ping) => ServerMessage::Pong(PongMessage { id: ping.id }),
    }
}

pub fn capabilities() -> Vec<String> {
    vec!["chat".to_string(), "plan".to_string(), "custom_plan".to_string()]
}

fn handle_chat(state: &AppState, chat: ChatMessage) -> ServerMessage {
    let handle = state.sessions.get_or_create(chat.session_id.as_deref());
    let mut session = handle.lock().unwrap_or_else(|e| e.into_inner());
    let session_id = session.session_id.clone();

    let outcome = match dialog::process_turn(&mut session, &chat.message, state.oracle.as_ref()) {
        Ok(outcome) => outcome,
        Err(e) => {
            return ServerMessage::Error(oracle_error_code(&e).to_error_message(Some(chat.id)));
        }
    };

    let mut result = ChatResultMessage {
        id: chat.id,
        session_id,
        assistant_message: None,
        slots_filled: None,
        ready: false,
        direct_ops: None,
        message: None,
    };

    match outcome {
        ChatOutcome::Question { text, slots } => {
            result.assistant_message = Some(text);
            result.slots_filled = Some(slots);
        }
        ChatOutcome::Ready { text, slots } => {
            result.assistant_message = Some(text);
            result.slots_filled = Some(slots);
            result.ready = true;
        }
        ChatOutcome::DirectOps { ops, diagnostics } => {
            result.direct_ops = Some(ops);
            if !diagnostics.is_empty() {
                result.message = Some(diagnostics.join("; "));
            }
        }
        ChatOutcome::Nothing { text } => {
            result.message = Some(text);
        }
    }

    ServerMessage::ChatResult(result)
}

fn handle_submit_plan(state: &AppState, submit: SubmitPlanMessage) -> ServerMessage {
    // Reject unparsable selections up front rather than failing the job.
    if parse_range(&submit.selected_range).is_err() {
        return ServerMessage::Error(ProtocolError::BadRange.to_error_message(Some(submit.id)));
    }

    let id = submit.id.clone();
    let task_id = jobs::spawn_plan_job(&state.jobs, Arc::clone(&state.oracle), submit);
    ServerMessage::PlanAccepted(PlanAcceptedMessage { id, task_id })
}

fn handle_poll_plan(state: &AppState, poll: PollPlanMessage) -> ServerMessage {
    let (status, result, error) = match state.jobs.status(&poll.task_id) {
        None => {
            return ServerMessage::Error(ProtocolError::UnknownTask.to_error_message(Some(poll.id)));
        }
        Some(JobState::Processing) => (PlanStatus::Processing, None, None),
        Some(JobState::Completed(result)) => (PlanStatus::Completed, Some(result), None),
        Some(JobState::Failed(e)) => (PlanStatus::Failed, None, Some(e)),
    };

    ServerMessage::PlanStatus(PlanStatusMessage {
        id: poll.id,
        task_id: poll.task_id,
        status,
        result,
        error,
    })
}

fn handle_custom_plan(state: &AppState, custom: CustomPlanMessage) -> ServerMessage {
    let message = if custom.sheet.is_empty() {
        custom.prompt.clone()
    } else {
        format!(
            "{}\n\nCurrent sheet contents:\n{}",
            custom.prompt,
            render_sheet_sample(&custom.sheet, 20)
        )
    };

    let raw = match state.oracle.complete(&direct_command_prompt(&message)) {
        Ok(raw) => raw,
        Err(e) => {
            return ServerMessage::Error(oracle_error_code(&e).to_error_message(Some(custom.id)));
        }
    };

    let (ops, diagnostics) = match recover_ops(&raw) {
        Ok(recovered) => recovered,
        Err(e) => (Vec::new(), vec![e.to_string()]),
    };

    ServerMessage::CustomPlanResult(CustomPlanResultMessage { id: custom.id, ops, diagnostics })
}
