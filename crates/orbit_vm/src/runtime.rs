//! The run state machine around one program execution.
//!
//! A run is: one counted fetch of the prior report, the interpreter loop,
//! a default self-report if the program never reported, then a completion
//! check on the outbound-call counter. IO happens only through the
//! [`ReportChannel`] provider, so the whole sequence stays synchronous and
//! host-agnostic.

use crate::compile::CompiledProgram;
use crate::exec::{ExecError, Fuel, Machine};
use crate::sandbox::{ExecutionContext, HTTP_REQUEST};
use crate::value::Value;

pub const DEFAULT_FUEL: Fuel = 1_000_000;

/// Both report round-trips a run performs, supplied by the host.
pub trait ReportChannel {
    /// Fetch the report currently stored for this run's identity.
    fn fetch_report(&self) -> Result<String, ChannelError>;
    /// Submit a serialized report body upstream.
    fn submit_report(&self, body: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, thiserror::Error)]
#[error("report channel: {0}")]
pub struct ChannelError(pub String);

#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub fuel_limit: Fuel,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fuel_limit: DEFAULT_FUEL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The run ended without both report round-trips on record.
    #[error("run did not complete")]
    Incomplete,
}

/// What a resolved run leaves behind: the call telemetry, plus the failure
/// that cut the program short, if any. A failed program still resolves; the
/// machine reports `empty` on its behalf.
#[derive(Debug)]
pub struct RunOutcome {
    pub context: ExecutionContext,
    pub failure: Option<ExecError>,
}

pub fn run(
    program: &CompiledProgram,
    channel: &dyn ReportChannel,
    cfg: RunConfig,
) -> Result<RunOutcome, RunError> {
    let mut machine = Machine::new(channel, cfg.fuel_limit);

    // The fetch is counted whether or not it lands; a run that cannot see
    // its prior report still executes, just with an unseeded stack.
    machine.sandbox_mut().count(HTTP_REQUEST);
    match channel.fetch_report() {
        Ok(prior) => machine.push(Value::Str(prior)),
        Err(e) => tracing::debug!("prior report fetch failed: {e}"),
    }

    let failure = machine.run(program).err();

    // Whatever happened, a run that never reported reports the default so
    // the stored record flips out of its initial state exactly once.
    if !machine.has_reported() {
        if let Err(e) = machine.report(&Value::Str("empty".into())) {
            tracing::debug!("default report failed: {e}");
        }
    }

    let context = machine.into_context();
    if context.calls_to(HTTP_REQUEST) < 2 {
        return Err(RunError::Incomplete);
    }
    Ok(RunOutcome { context, failure })
}
