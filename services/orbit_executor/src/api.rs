use crate::channel::HttpReportChannel;
use crate::AppState;
use axum::{extract::State, Json};
use orbit_proto::{is_api_key, is_vm_id, Envelope};
use orbit_vm::RunConfig;
use serde_json::{json, Value};
use std::time::Duration;

/// Hard deadline for one program run, report round-trips included.
const EXEC_DEADLINE: Duration = Duration::from_secs(5);

/// POST /execute — validate identities, compile the program, run it with
/// the report channel bound to this run, and hand back the call telemetry.
/// Domain failures answer 200 with `ok: false`.
pub async fn execute(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Envelope> {
    // Program shape goes first: a request malformed in several ways answers
    // for its opcodes before its identities.
    let raw = match body.get("opcodes").and_then(Value::as_array) {
        Some(raw) => raw,
        None => return Json(Envelope::err("invalid opcode")),
    };
    let vm_id = match body.get("vmId").and_then(Value::as_str) {
        Some(id) if is_vm_id(id) => id.to_string(),
        _ => return Json(Envelope::err("invalid vmId")),
    };
    // Format check only: the coordination node is the authority on whether
    // the key actually opens the store.
    let api_key = match body.get("apiKey").and_then(Value::as_str) {
        Some(key) if is_api_key(key) => key.to_string(),
        _ => return Json(Envelope::err("invalid apiKey")),
    };
    let program = match orbit_vm::compile_wire(raw) {
        Ok(program) => program,
        Err(e) => return Json(Envelope::err(e.to_string())),
    };

    let reporter = state.cfg.reporter_url.clone();
    let fuel_limit = state.cfg.fuel_limit;
    let task = tokio::task::spawn_blocking(move || {
        let channel = HttpReportChannel::connect(reporter, vm_id, api_key)?;
        orbit_vm::run(&program, &channel, RunConfig { fuel_limit })
            .map_err(|e| orbit_vm::ChannelError(e.to_string()))
    });

    // An overrun leaves the blocking task to finish on its own; the
    // response just stops waiting for it.
    match tokio::time::timeout(EXEC_DEADLINE, task).await {
        Ok(Ok(Ok(outcome))) => {
            if let Some(failure) = &outcome.failure {
                tracing::warn!("run failed: {failure}");
            }
            Json(Envelope::ok(json!(outcome.context)))
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!("run did not resolve: {e}");
            Json(Envelope::err("unexpected error"))
        }
        Ok(Err(e)) => {
            tracing::error!("run task panicked: {e}");
            Json(Envelope::err("unexpected error"))
        }
        Err(_) => {
            tracing::warn!("run exceeded the execution deadline");
            Json(Envelope::err("unexpected error"))
        }
    }
}
