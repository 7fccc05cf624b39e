//! The four coordination endpoints: run creation for clients, report
//! retrieval for clients, and the two store operations the execution node
//! performs mid-run. Every answer is an envelope over HTTP 200; storage
//! and forwarding trouble collapse to fixed error phrases.

use crate::store::VmRecord;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use orbit_proto::{
    derive_api_key, is_access_key, is_api_key, is_vm_id, mint_vm_id, Envelope, ExecuteRequest,
    REPORT_MAX,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default, rename = "accessKey")]
    access_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    #[serde(default, rename = "vmId")]
    vm_id: String,
    #[serde(default, rename = "accessKey")]
    access_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecutorQuery {
    #[serde(default, rename = "vmId")]
    vm_id: String,
    #[serde(default, rename = "apiKey")]
    api_key: String,
}

impl ExecutorQuery {
    fn check(&self, state: &AppState) -> Option<Envelope> {
        if !is_vm_id(&self.vm_id) {
            return Some(Envelope::err("invalid vmId"));
        }
        if !is_api_key(&self.api_key) || self.api_key != derive_api_key(&state.cfg.api_secret) {
            return Some(Envelope::err("invalid apiKey"));
        }
        None
    }
}

/// POST /execute?accessKey=... — mint a run, persist its initial record,
/// forward the program to the execution node, and persist the telemetry
/// the run came back with.
pub async fn execute(
    State(state): State<AppState>,
    Query(q): Query<ExecuteQuery>,
    Json(body): Json<Value>,
) -> Json<Envelope> {
    if !is_access_key(&q.access_key) {
        return Json(Envelope::err("invalid accessKey"));
    }
    let report = match body.get("report") {
        None => "empty".to_string(),
        Some(Value::String(s)) if s.len() <= REPORT_MAX => s.clone(),
        Some(_) => return Json(Envelope::err("invalid report")),
    };
    let opcodes = body
        .get("opcodes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let vm_id = mint_vm_id();
    let record = VmRecord::new(q.access_key, report);
    if let Err(e) = state.store.insert(&vm_id, &record).await {
        tracing::error!("insert failed for {vm_id}: {e}");
        return Json(Envelope::err("can't insert new vm"));
    }

    let req = ExecuteRequest {
        vm_id: vm_id.clone(),
        api_key: derive_api_key(&state.cfg.api_secret),
        opcodes,
    };
    let forwarded = state
        .http
        .post(format!("{}/api/execute", state.cfg.executor_url))
        .json(&req)
        .send()
        .await;
    let resp: Envelope = match forwarded {
        Ok(r) => match r.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("execution node answered garbage: {e}");
                return Json(Envelope::err("unexpected error"));
            }
        },
        Err(e) => {
            tracing::warn!("execution node unreachable: {e}");
            return Json(Envelope::err("unexpected error"));
        }
    };

    match (resp.ok, resp.result) {
        (true, Some(context)) => {
            if let Err(e) = state.store.update_context(&vm_id, context.clone()).await {
                tracing::error!("context update failed for {vm_id}: {e}");
                return Json(Envelope::err("can't update vm context"));
            }
            Json(Envelope::ok(json!({"context": context, "vmId": vm_id})))
        }
        (false, _) => Json(Envelope::err(
            resp.error.unwrap_or_else(|| "unexpected error".to_string()),
        )),
        (true, None) => Json(Envelope::err("unexpected error")),
    }
}

/// GET /getReport?vmId=..&accessKey=.. — a record is only visible under
/// the access key it was created with; a key mismatch looks identical to
/// an absent record.
pub async fn get_report(
    State(state): State<AppState>,
    Query(q): Query<ClientQuery>,
) -> Json<Envelope> {
    if !is_vm_id(&q.vm_id) {
        return Json(Envelope::err("invalid vmId"));
    }
    if !is_access_key(&q.access_key) {
        return Json(Envelope::err("invalid accessKey"));
    }
    match state.store.get(&q.vm_id).await {
        Some(record) if record.access_key == q.access_key => {
            Json(Envelope::ok(json!(record.report)))
        }
        _ => Json(Envelope::err("no such vm")),
    }
}

/// GET /executor/getReport?vmId=..&apiKey=.. — key-scoped, not
/// access-key-scoped: the execution node reads any run it is executing.
pub async fn executor_get_report(
    State(state): State<AppState>,
    Query(q): Query<ExecutorQuery>,
) -> Json<Envelope> {
    if let Some(refusal) = q.check(&state) {
        return Json(refusal);
    }
    match state.store.get(&q.vm_id).await {
        Some(record) => Json(Envelope::ok(json!(record.report))),
        None => Json(Envelope::err("no such vm")),
    }
}

/// POST /executor/postReport?vmId=..&apiKey=.. with `{"value": ...}`.
pub async fn executor_post_report(
    State(state): State<AppState>,
    Query(q): Query<ExecutorQuery>,
    Json(body): Json<Value>,
) -> Json<Envelope> {
    if let Some(refusal) = q.check(&state) {
        return Json(refusal);
    }
    let value = match body.get("value") {
        None => "",
        Some(Value::String(s)) if s.len() <= REPORT_MAX => s,
        Some(_) => return Json(Envelope::err("invalid value")),
    };
    if let Err(e) = state.store.update_report(&q.vm_id, value).await {
        tracing::error!("report update failed for {}: {e}", q.vm_id);
        return Json(Envelope::err("can't update vm result"));
    }
    Json(Envelope::ok(Value::Null))
}
