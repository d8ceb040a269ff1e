//! Asynchronous plan jobs.
//!
//! A submit request is acknowledged immediately with a task id; a worker
//! thread talks to the oracle and compiles the plan while the client polls.
//! Job state transitions exactly once, from Processing to Completed or
//! Failed, and finished jobs stay in the table until process exit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use capsheet_engine::captable::RoundParams;
use capsheet_engine::plan::compile_plan;
use capsheet_engine::rows::coerce_number;
use capsheet_oracle::extract::recover_column_mapping;
use capsheet_oracle::prompts::{column_mapping_prompt, render_sheet_sample};
use capsheet_oracle::Oracle;
use capsheet_protocol::{PlanResult, SlotValues, SubmitPlanMessage};

/// Rows of sheet context shown to the oracle when inferring column roles.
const MAPPING_SAMPLE_ROWS: usize = 8;

#[derive(Debug, Clone)]
pub enum JobState {
    Processing,
    Completed(PlanResult),
    Failed(String),
}

/// Process-wide plan job table.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, JobState>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, task_id: &str) -> Option<JobState> {
        let table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        table.get(task_id).cloned()
    }

    fn insert_processing(&self, task_id: &str) {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        table.insert(task_id.to_string(), JobState::Processing);
    }

    /// Move a job out of Processing. A job that has already finished keeps
    /// its first outcome.
    fn finish(&self, task_id: &str, outcome: JobState) {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match table.get(task_id) {
            Some(JobState::Processing) => {
                table.insert(task_id.to_string(), outcome);
            }
            Some(_) => {
                log::warn!("job {} already finished, dropping late transition", task_id);
            }
            None => {
                log::warn!("job {} unknown, dropping transition", task_id);
            }
        }
    }
}

/// Queue a plan build. Returns the task id to poll.
pub fn spawn_plan_job(jobs: &JobStore, oracle: Arc<dyn Oracle>, req: SubmitPlanMessage) -> String {
    let task_id = uuid::Uuid::new_v4().to_string();
    jobs.insert_processing(&task_id);

    let jobs = jobs.clone();
    let worker_task_id = task_id.clone();
    thread::spawn(move || {
        let outcome = match run_plan_job(oracle.as_ref(), &req) {
            Ok(result) => JobState::Completed(result),
            Err(e) => {
                log::warn!("plan job {} failed: {}", worker_task_id, e);
                JobState::Failed(e)
            }
        };
        jobs.finish(&worker_task_id, outcome);
    });

    task_id
}

/// The actual plan build: column mapping from the oracle, then compile.
pub fn run_plan_job(oracle: &dyn Oracle, req: &SubmitPlanMessage) -> Result<PlanResult, String> {
    let params = round_params_from_slots(&req.slots)?;

    let sample = render_sheet_sample(&req.sheet, MAPPING_SAMPLE_ROWS);
    let raw = oracle
        .complete(&column_mapping_prompt(&sample))
        .map_err(|e| format!("oracle: {}", e))?;
    let mapping = recover_column_mapping(&raw);
    let unmapped = mapping.name_col.is_none() && mapping.shares_col.is_none();

    let mut result = compile_plan(&params, &req.sheet, mapping, &req.selected_range)
        .map_err(|e| e.to_string())?;
    if unmapped {
        result
            .diagnostics
            .insert(0, "column roles not recognized, using default layout".to_string());
    }
    Ok(result)
}

/// Convert collected slot strings into numeric round parameters.
pub fn round_params_from_slots(slots: &SlotValues) -> Result<RoundParams, String> {
    let round_type = slots
        .round_type
        .as_deref()
        .ok_or_else(|| "missing slot roundType".to_string())?
        .to_string();
    let amount = parse_money(slots.amount.as_deref().ok_or("missing slot amount")?)
        .ok_or_else(|| format!("unparsable amount {:?}", slots.amount))?;
    let pre_money = parse_money(slots.pre_money.as_deref().ok_or("missing slot preMoney")?)
        .ok_or_else(|| format!("unparsable preMoney {:?}", slots.pre_money))?;
    let pool_pct = parse_percent(slots.pool_pct.as_deref().ok_or("missing slot poolPct")?)
        .ok_or_else(|| format!("unparsable poolPct {:?}", slots.pool_pct))?;

    Ok(RoundParams { round_type, amount, pre_money, pool_pct })
}

/// Money values as users type them: "5000000", "$5,000,000", "5M", "500k".
fn parse_money(raw: &str) -> Option<f64> {
    let t = raw.trim();
    let (body, mult) = if t.ends_with('M') || t.ends_with('m') {
        (&t[..t.len() - 1], 1e6)
    } else if t.ends_with('K') || t.ends_with('k') {
        (&t[..t.len() - 1], 1e3)
    } else {
        (t, 1.0)
    };
    coerce_number(body).map(|v| v * mult)
}

/// Pool percentage on the 0-100 scale, with or without a trailing '%'.
fn parse_percent(raw: &str) -> Option<f64> {
    coerce_number(raw.trim().trim_end_matches('%'))
}
