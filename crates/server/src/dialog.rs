//! Dialog state machine for round-parameter collection.
//!
//! Two phases. Idle treats each message as a direct spreadsheet command and
//! asks the oracle to translate it into operations. A trigger phrase flips
//! the session into Collecting, which walks the four slots in a fixed order,
//! asking one fixed-template question per turn until all are known. Slot
//! values come from the oracle's extraction answer; the questions themselves
//! are never generated, so the flow is deterministic.

use capsheet_oracle::extract::{recover_object, recover_ops};
use capsheet_oracle::prompts::{direct_command_prompt, slot_extraction_prompt};
use capsheet_oracle::{Oracle, OracleError};
use capsheet_protocol::{ActionOp, SlotValues};
use serde_json::Value;

use crate::session::{DialogState, Session};

/// Phrases that start round-parameter collection.
const TRIGGER_PHRASES: &[&str] = &["cap table", "captable", "funding round", "raise"];

/// The four slots, in the order they are asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKey {
    RoundType,
    Amount,
    PreMoney,
    PoolPct,
}

pub const SLOT_ORDER: [SlotKey; 4] =
    [SlotKey::RoundType, SlotKey::Amount, SlotKey::PreMoney, SlotKey::PoolPct];

impl SlotKey {
    pub fn wire_name(&self) -> &'static str {
        match self {
            SlotKey::RoundType => "roundType",
            SlotKey::Amount => "amount",
            SlotKey::PreMoney => "preMoney",
            SlotKey::PoolPct => "poolPct",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            SlotKey::RoundType => "What type of funding round is this? (e.g., Seed, Series A)",
            SlotKey::Amount => "How much is being raised in this round? (e.g., $5M)",
            SlotKey::PreMoney => "What is the pre-money valuation? (e.g., $20M)",
            SlotKey::PoolPct => "What percentage should the option pool be? (e.g., 10)",
        }
    }

    fn get(&self, slots: &SlotValues) -> Option<String> {
        match self {
            SlotKey::RoundType => slots.round_type.clone(),
            SlotKey::Amount => slots.amount.clone(),
            SlotKey::PreMoney => slots.pre_money.clone(),
            SlotKey::PoolPct => slots.pool_pct.clone(),
        }
    }

    fn set(&self, slots: &mut SlotValues, value: String) {
        match self {
            SlotKey::RoundType => slots.round_type = Some(value),
            SlotKey::Amount => slots.amount = Some(value),
            SlotKey::PreMoney => slots.pre_money = Some(value),
            SlotKey::PoolPct => slots.pool_pct = Some(value),
        }
    }
}

/// The first slot still unknown, in fixed order.
pub fn next_missing(slots: &SlotValues) -> Option<SlotKey> {
    SLOT_ORDER.iter().copied().find(|key| key.get(slots).is_none())
}

/// Outcome of one chat turn.
#[derive(Debug)]
pub enum ChatOutcome {
    /// Still collecting; ask this question next.
    Question { text: String, slots: SlotValues },
    /// All four slots known; client may submit a plan.
    Ready { text: String, slots: SlotValues },
    /// Idle-mode direct command translated into operations.
    DirectOps { ops: Vec<ActionOp>, diagnostics: Vec<String> },
    /// Nothing actionable in the message.
    Nothing { text: String },
}

fn is_trigger(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRIGGER_PHRASES.iter().any(|p| lower.contains(p))
}

/// Run one turn of the dialog against a locked session.
pub fn process_turn(
    session: &mut Session,
    message: &str,
    oracle: &dyn Oracle,
) -> Result<ChatOutcome, OracleError> {
    session.push_user(message);

    match session.state {
        DialogState::Idle if is_trigger(message) => {
            session.state = DialogState::Collecting;
            // The trigger message itself may already carry slot values
            // ("raise a $5M Series A").
            collect_turn(session, message, oracle)
        }
        DialogState::Idle => direct_turn(session, message, oracle),
        DialogState::Collecting => collect_turn(session, message, oracle),
    }
}

/// One collecting-phase turn: extract slots, then ask or finish.
fn collect_turn(
    session: &mut Session,
    message: &str,
    oracle: &dyn Oracle,
) -> Result<ChatOutcome, OracleError> {
    let prompt = slot_extraction_prompt(
        &session.slots,
        &session.history_text(),
        message,
        session.last_prompted.map(|key| key.wire_name()),
    );

    // Extraction failure degrades to "nothing new learned"; the dialog just
    // re-asks rather than surfacing a transport error mid-conversation.
    let extracted = match oracle.complete(&prompt) {
        Ok(raw) => recover_object(&raw),
        Err(e) => {
            log::warn!("slot extraction failed: {}", e);
            serde_json::Map::new()
        }
    };
    merge_slots(&mut session.slots, &extracted);

    match next_missing(&session.slots) {
        Some(key) => {
            session.last_prompted = Some(key);
            let text = key.question().to_string();
            session.push_assistant(&text);
            Ok(ChatOutcome::Question { text, slots: session.slots.clone() })
        }
        None => {
            session.state = DialogState::Idle;
            session.last_prompted = None;
            let text =
                "All round parameters collected. Ready to build the cap table.".to_string();
            session.push_assistant(&text);
            Ok(ChatOutcome::Ready { text, slots: session.slots.clone() })
        }
    }
}

/// Idle-phase turn: translate a free-form command into operations.
fn direct_turn(
    session: &mut Session,
    message: &str,
    oracle: &dyn Oracle,
) -> Result<ChatOutcome, OracleError> {
    let raw = oracle.complete(&direct_command_prompt(message))?;

    match recover_ops(&raw) {
        Ok((ops, diagnostics)) if !ops.is_empty() => {
            session.push_assistant(&format!("Applied {} operation(s).", ops.len()));
            Ok(ChatOutcome::DirectOps { ops, diagnostics })
        }
        _ => {
            let text = "I could not turn that into spreadsheet operations.".to_string();
            session.push_assistant(&text);
            Ok(ChatOutcome::Nothing { text })
        }
    }
}

/// Fold extracted key/values into the slot record. Unknown keys are dropped;
/// later mentions overwrite earlier ones so users can correct themselves.
pub fn merge_slots(slots: &mut SlotValues, extracted: &serde_json::Map<String, Value>) {
    for key in SLOT_ORDER {
        if let Some(value) = extracted.get(key.wire_name()) {
            if let Some(text) = value_to_string(value) {
                key.set(slots, text);
            }
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
