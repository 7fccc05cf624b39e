//! Report round-trips against the coordination node, one blocking client
//! per run with a tight per-request deadline.

use orbit_vm::{ChannelError, ReportChannel};
use std::time::Duration;

const REQUEST_DEADLINE: Duration = Duration::from_secs(1);

pub struct HttpReportChannel {
    base: String,
    vm_id: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl HttpReportChannel {
    /// Must be built on a blocking thread; the client carries its own
    /// runtime and refuses construction inside an async context.
    pub fn connect(base: String, vm_id: String, api_key: String) -> Result<Self, ChannelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_DEADLINE)
            .build()
            .map_err(|e| ChannelError(e.to_string()))?;
        Ok(Self {
            base,
            vm_id,
            api_key,
            client,
        })
    }

    fn query(&self) -> [(&'static str, &str); 2] {
        [("vmId", self.vm_id.as_str()), ("apiKey", self.api_key.as_str())]
    }
}

impl ReportChannel for HttpReportChannel {
    fn fetch_report(&self) -> Result<String, ChannelError> {
        let resp: orbit_proto::Envelope = self
            .client
            .get(format!("{}/api/executor/getReport", self.base))
            .query(&self.query())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChannelError(e.to_string()))?
            .json()
            .map_err(|e| ChannelError(e.to_string()))?;
        resp.result
            .as_ref()
            .filter(|_| resp.ok)
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ChannelError(resp.error.unwrap_or_else(|| "malformed response".to_string()))
            })
    }

    fn submit_report(&self, body: &str) -> Result<(), ChannelError> {
        self.client
            .post(format!("{}/api/executor/postReport", self.base))
            .query(&self.query())
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChannelError(e.to_string()))?;
        Ok(())
    }
}
