//! Call tracking for remote callables: wrap a function inside the
//! kernel so every invocation's bound arguments and return value are
//! recorded, then restore the original on release.

use serde_json::Value;

use crate::codec::TrackerSpec;
use crate::error::{Error, Result};
use crate::reference::{Arg, Reference};
use crate::session::{randomize_name, Session};
use tracing::debug;

pub mod replace;

/// What the injected tracker records per call.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Parameter names to keep; ignored when `all_parameters` is set.
    pub parameters: Vec<String>,
    pub all_parameters: bool,
    pub return_values: bool,
}

impl TrackOptions {
    pub fn all() -> Self {
        Self {
            all_parameters: true,
            return_values: true,
            ..Self::default()
        }
    }

    pub fn parameters<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: names.into_iter().map(Into::into).collect(),
            return_values: true,
            ..Self::default()
        }
    }

    pub fn without_return_values(mut self) -> Self {
        self.return_values = false;
        self
    }
}

/// One recorded invocation: parameter bindings in declaration order and
/// the return value (`None` when return capture was disabled).
#[derive(Debug, Clone)]
pub struct RecordedCall {
    parameters: Vec<(String, Value)>,
    return_value: Option<Value>,
}

impl RecordedCall {
    /// Parse the `[bound_pairs, return_value]` shape the tracker stores.
    fn from_value(value: &Value, track_returns: bool) -> Result<Self> {
        let entry = value
            .as_array()
            .filter(|e| e.len() == 2)
            .ok_or_else(|| Error::encoding(format!("malformed recorded call: {value}")))?;
        let pairs = entry[0]
            .as_array()
            .ok_or_else(|| Error::encoding("malformed parameter pairs"))?;

        let mut parameters = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let pair = pair
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| Error::encoding("malformed parameter pair"))?;
            let name = pair[0]
                .as_str()
                .ok_or_else(|| Error::encoding("parameter name is not a string"))?;
            parameters.push((name.to_string(), pair[1].clone()));
        }

        Ok(Self {
            parameters,
            return_value: track_returns.then(|| entry[1].clone()),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }

    /// `None` when return capture was disabled at install time.
    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }
}

/// Scoped instrumentation of one remote callable.
///
/// [`FunctionTracker::install`] snapshots the current binding, injects
/// the interception construct, and rebinds the target to it.
/// [`FunctionTracker::restore`] puts the snapshot back; the call log
/// stays readable afterwards. Trackers on independent targets compose;
/// nesting two on the same target is not supported.
pub struct FunctionTracker {
    session: Session,
    target: String,
    tracker: Reference,
    backup: Reference,
    return_values: bool,
    restored: bool,
}

impl FunctionTracker {
    pub async fn install(session: &Session, target: &str, options: TrackOptions) -> Result<Self> {
        let backup = session.ref_to(target).copy().await?;

        let class_name = randomize_name("Track");
        let instance_name = randomize_name("track");
        let source = session.codegen().tracker_source(&TrackerSpec {
            target,
            class_name: &class_name,
            instance_name: &instance_name,
            parameters: &options.parameters,
            all_parameters: options.all_parameters,
            return_values: options.return_values,
        });
        session.execute_code(&source).await?;
        debug!(target, "tracker installed");

        Ok(Self {
            session: session.clone(),
            target: target.to_string(),
            tracker: session.ref_to(&instance_name),
            backup,
            return_values: options.return_values,
            restored: false,
        })
    }

    /// All recorded calls, oldest first.
    pub async fn receive(&self) -> Result<Vec<RecordedCall>> {
        let calls = self.tracker.attr("calls").receive().await?;
        calls
            .as_array()
            .ok_or_else(|| Error::encoding("tracker call log is not a list"))?
            .iter()
            .map(|c| RecordedCall::from_value(c, self.return_values))
            .collect()
    }

    pub async fn receive_first(&self) -> Result<Option<RecordedCall>> {
        self.receive_at(0).await
    }

    pub async fn receive_last(&self) -> Result<Option<RecordedCall>> {
        self.receive_at(-1).await
    }

    async fn receive_at(&self, index: i64) -> Result<Option<RecordedCall>> {
        let calls = self.tracker.attr("calls");
        if calls.len().await? == 0 {
            return Ok(None);
        }
        let call = calls.item(Value::from(index)).receive().await?;
        Ok(Some(RecordedCall::from_value(&call, self.return_values)?))
    }

    /// Empty the remote call log without releasing the tracker.
    pub async fn clear(&self) -> Result<()> {
        self.tracker
            .attr("clear")
            .call(Vec::<Arg>::new())
            .execute()
            .await?;
        Ok(())
    }

    /// Rebind the target to the pre-install snapshot. Idempotent.
    pub async fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        let code = self
            .session
            .codegen()
            .assign(&self.target, self.backup.root_name());
        self.session.execute_code(&code).await?;
        self.restored = true;
        debug!(target = %self.target, "tracker restored");
        Ok(())
    }
}
