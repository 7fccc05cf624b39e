//! Both nodes wired together over loopback: runs created here execute on a
//! real execution node whose report channel points back at this store.

use orbit_proto::{derive_api_key, mint_vm_id};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const SECRET: &str = "ORBITDEVSECRET22";

async fn setup() -> (String, Client, Vec<JoinHandle<()>>) {
    // The two nodes reference each other's addresses, so bind the store's
    // listener first and only serve it once the execution node is up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let reporter_addr = listener.local_addr().unwrap();
    let (executor_addr, exec_handle) = orbit_executor::test::spawn(orbit_executor::Config {
        port: 0,
        reporter_url: format!("http://{reporter_addr}"),
        fuel_limit: orbit_vm::DEFAULT_FUEL,
    })
    .await;
    let cfg = orbit_reporter::Config {
        port: 0,
        executor_url: format!("http://{executor_addr}"),
        api_secret: SECRET.to_string(),
        data_dir: std::env::temp_dir()
            .join(format!("orbit-reporter-{}", mint_vm_id()))
            .to_string_lossy()
            .into_owned(),
    };
    let rep_handle = orbit_reporter::test::serve(listener, cfg);
    let base = format!("http://{reporter_addr}");
    (base, Client::new(), vec![exec_handle, rep_handle])
}

async fn execute(base: &str, http: &Client, access_key: &str, body: &Value) -> Value {
    http.post(format!("{base}/api/execute"))
        .query(&[("accessKey", access_key)])
        .json(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn get_report(base: &str, http: &Client, vm_id: &str, access_key: &str) -> Value {
    http.get(format!("{base}/api/getReport"))
        .query(&[("vmId", vm_id), ("accessKey", access_key)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn a_run_computes_and_its_report_is_readable() {
    let (base, http, _guards) = setup().await;
    let access_key = mint_vm_id();
    let resp = execute(
        &base,
        &http,
        &access_key,
        &json!({"opcodes": [
            ["OP_RESET"],
            ["OP_PUSH", 1],
            ["OP_PUSH", 2],
            ["OP_ADD"],
            ["OP_REPORT"]
        ]}),
    )
    .await;
    assert_eq!(resp["ok"], json!(true), "unexpected response: {resp}");
    assert_eq!(
        resp["result"]["context"]["CALLS"],
        json!({"http.request": 2, "JSON.stringify": 1})
    );
    let vm_id = resp["result"]["vmId"].as_str().unwrap();
    assert!(orbit_proto::is_vm_id(vm_id));

    let fetched = get_report(&base, &http, vm_id, &access_key).await;
    assert_eq!(fetched["ok"], json!(true));
    assert_eq!(fetched["result"], json!("3"));
}

#[tokio::test]
async fn the_initial_report_seeds_the_run() {
    let (base, http, _guards) = setup().await;
    let access_key = mint_vm_id();
    let resp = execute(
        &base,
        &http,
        &access_key,
        &json!({"report": "seedval", "opcodes": [["OP_REPORT"]]}),
    )
    .await;
    assert_eq!(resp["ok"], json!(true), "unexpected response: {resp}");
    let vm_id = resp["result"]["vmId"].as_str().unwrap();
    let fetched = get_report(&base, &http, vm_id, &access_key).await;
    assert_eq!(fetched["result"], json!("seedval"));
}

#[tokio::test]
async fn a_failing_program_leaves_the_default_report() {
    let (base, http, _guards) = setup().await;
    let access_key = mint_vm_id();
    let resp = execute(
        &base,
        &http,
        &access_key,
        &json!({"report": "seed", "opcodes": [["OP_RESET"], ["OP_POP"]]}),
    )
    .await;
    assert_eq!(resp["ok"], json!(true), "unexpected response: {resp}");
    let vm_id = resp["result"]["vmId"].as_str().unwrap();
    let fetched = get_report(&base, &http, vm_id, &access_key).await;
    assert_eq!(fetched["result"], json!("empty"));
}

#[tokio::test]
async fn the_wrong_access_key_sees_nothing() {
    let (base, http, _guards) = setup().await;
    let access_key = mint_vm_id();
    let resp = execute(&base, &http, &access_key, &json!({"opcodes": [["OP_REPORT"]]})).await;
    let vm_id = resp["result"]["vmId"].as_str().unwrap();

    let fetched = get_report(&base, &http, vm_id, &mint_vm_id()).await;
    assert_eq!(fetched["ok"], json!(false));
    assert_eq!(fetched["error"], json!("no such vm"));
}

#[tokio::test]
async fn refuses_malformed_identities() {
    let (base, http, _guards) = setup().await;
    let resp = execute(&base, &http, "not-a-key", &json!({"opcodes": []})).await;
    assert_eq!(resp["error"], json!("invalid accessKey"));

    let fetched = get_report(&base, &http, "nope", &mint_vm_id()).await;
    assert_eq!(fetched["error"], json!("invalid vmId"));

    let fetched = get_report(&base, &http, &mint_vm_id(), "NOPE").await;
    assert_eq!(fetched["error"], json!("invalid accessKey"));
}

#[tokio::test]
async fn refuses_an_oversized_or_non_string_initial_report() {
    let (base, http, _guards) = setup().await;
    let access_key = mint_vm_id();
    let resp = execute(
        &base,
        &http,
        &access_key,
        &json!({"report": "x".repeat(1025), "opcodes": []}),
    )
    .await;
    assert_eq!(resp["error"], json!("invalid report"));
    let resp = execute(&base, &http, &access_key, &json!({"report": 7, "opcodes": []})).await;
    assert_eq!(resp["error"], json!("invalid report"));
}

#[tokio::test]
async fn an_invalid_program_surfaces_the_validator_reason() {
    let (base, http, _guards) = setup().await;
    let resp = execute(
        &base,
        &http,
        &mint_vm_id(),
        &json!({"opcodes": [["OP_EXPLODE"]]}),
    )
    .await;
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"], json!("invalid opcode"));
}

#[tokio::test]
async fn concurrent_runs_stay_isolated() {
    let (base, http, _guards) = setup().await;
    let key_a = mint_vm_id();
    let key_b = mint_vm_id();
    let prog = |s: &str| json!({"opcodes": [["OP_RESET"], ["OP_PUSH", s], ["OP_REPORT"]]});
    let prog_a = prog("AAAA");
    let prog_b = prog("BBBB");
    let (ra, rb) = tokio::join!(
        execute(&base, &http, &key_a, &prog_a),
        execute(&base, &http, &key_b, &prog_b),
    );
    let vm_a = ra["result"]["vmId"].as_str().unwrap();
    let vm_b = rb["result"]["vmId"].as_str().unwrap();
    assert_ne!(vm_a, vm_b);
    assert_eq!(get_report(&base, &http, vm_a, &key_a).await["result"], json!("AAAA"));
    assert_eq!(get_report(&base, &http, vm_b, &key_b).await["result"], json!("BBBB"));
}

#[tokio::test]
async fn executor_endpoints_are_key_gated() {
    let (base, http, _guards) = setup().await;
    let good_key = derive_api_key(SECRET);
    let foreign_key = derive_api_key("AAAABBBBCCCCDDDD");

    let resp: Value = http
        .get(format!("{base}/api/executor/getReport"))
        .query(&[("vmId", mint_vm_id().as_str()), ("apiKey", "garbage")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"], json!("invalid apiKey"));

    let resp: Value = http
        .get(format!("{base}/api/executor/getReport"))
        .query(&[("vmId", mint_vm_id().as_str()), ("apiKey", foreign_key.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"], json!("invalid apiKey"));

    // A well-formed key on an absent run: readable paths say so, the
    // update path is a quiet no-op.
    let resp: Value = http
        .get(format!("{base}/api/executor/getReport"))
        .query(&[("vmId", mint_vm_id().as_str()), ("apiKey", good_key.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"], json!("no such vm"));

    let resp: Value = http
        .post(format!("{base}/api/executor/postReport"))
        .query(&[("vmId", mint_vm_id().as_str()), ("apiKey", good_key.as_str())])
        .json(&json!({"value": "late"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["result"], json!(null));
}

#[tokio::test]
async fn post_report_refuses_an_oversized_value() {
    let (base, http, _guards) = setup().await;
    let resp: Value = http
        .post(format!("{base}/api/executor/postReport"))
        .query(&[
            ("vmId", mint_vm_id().as_str()),
            ("apiKey", derive_api_key(SECRET).as_str()),
        ])
        .json(&json!({"value": "x".repeat(1025)}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"], json!("invalid value"));
}
