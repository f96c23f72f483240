use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::proxy::SessionSnapshot;
use crate::throttle::RuleSetId;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub throttler_running: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RuleSetStatus {
    pub name: String,
    pub index: usize,
    pub bytes_per_second: u64,
    pub pending_requests: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThrottleStatus {
    pub burst_interval_ms: u64,
    pub rule_sets: Vec<RuleSetStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetBudget {
    pub bytes_per_second: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetBurstInterval {
    pub ms: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let running = !state.ctx.throttler.is_shut_down();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if running { "operational" } else { "stopping" },
        uptime_secs: state.started.elapsed().as_secs(),
        active_sessions: state.ctx.sessions.len(),
        throttler_running: running,
    })
}

pub async fn get_throttle(State(state): State<AdminState>) -> Json<ThrottleStatus> {
    let config = state.ctx.config.load();
    let rule_sets = config
        .throttle
        .rule_sets
        .iter()
        .enumerate()
        .filter_map(|(index, rule_set)| rule_set_status(&state, index, &rule_set.name))
        .collect();

    Json(ThrottleStatus {
        burst_interval_ms: state.ctx.throttler.burst_interval_ms(),
        rule_sets,
    })
}

pub async fn put_throttle(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(body): Json<SetBudget>,
) -> Result<Json<RuleSetStatus>, StatusCode> {
    let index = state
        .ctx
        .config
        .load()
        .throttle
        .index_of(&name)
        .ok_or(StatusCode::NOT_FOUND)?;

    state
        .ctx
        .throttler
        .set_bytes_per_second(RuleSetId(index), body.bytes_per_second)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    tracing::info!(rule_set = %name, bytes_per_second = body.bytes_per_second, "Budget changed via admin API");

    rule_set_status(&state, index, &name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn put_burst_interval(
    State(state): State<AdminState>,
    Json(body): Json<SetBurstInterval>,
) -> Json<SetBurstInterval> {
    state.ctx.throttler.set_burst_interval_ms(body.ms);
    let effective = state.ctx.throttler.burst_interval_ms();
    tracing::info!(requested = body.ms, effective, "Burst interval changed via admin API");
    Json(SetBurstInterval { ms: effective })
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.ctx.sessions.snapshot())
}

fn rule_set_status(state: &AdminState, index: usize, name: &str) -> Option<RuleSetStatus> {
    let throttler = &state.ctx.throttler;
    let id = RuleSetId(index);
    Some(RuleSetStatus {
        name: name.to_string(),
        index,
        bytes_per_second: throttler.bytes_per_second(id).ok()?,
        pending_requests: throttler.pending_requests(id).ok()?,
    })
}
