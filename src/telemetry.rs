//! Telemetry sinks for workflow milestones.
//!
//! A sink is fire-and-forget: recording never fails and never blocks the
//! caller for longer than it takes to format the event.

use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};
use log::debug;
use serde_json::Value;

pub type Properties = serde_json::Map<String, Value>;

pub const INITIAL_SETUP: &str = "InitialSetup";
pub const PROGRAM_STORED: &str = "ProgramStored";
pub const SECRET_STORED: &str = "SecretStored";
pub const COMPUTATION_STARTED: &str = "ComputationStarted";
pub const COMPUTATION_COMPLETE: &str = "ComputationComplete";

/// Build a property map from `(key, value)` pairs.
pub fn properties<const N: usize>(pairs: [(&str, Value); N]) -> Properties {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &str, properties: Option<&Properties>);
}

// prints events; stands in for a real observability backend
#[derive(Debug, Clone, Default)]
pub struct StdoutTelemetry {
    api_key: Option<String>,
}

impl StdoutTelemetry {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl TelemetrySink for StdoutTelemetry {
    fn record(&self, event: &str, properties: Option<&Properties>) {
        let properties = properties.map_or(Value::Null, |props| Value::Object(props.clone()));
        debug!("Telemetry api key configured: `{}`", self.api_key.is_some());
        println!("Sending telemetry event '{event}' with properties: {properties}");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: String,
    pub properties: Option<Properties>,
}

/// Keeps every recorded event in memory, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.name)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &str, properties: Option<&Properties>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TelemetryEvent {
                name: event.to_string(),
                properties: properties.cloned(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_sink_keeps_order_and_properties() {
        let sink = RecordingTelemetry::new();
        let shared = sink.clone();
        let setup = properties([("cluster_id", json!("c-1"))]);
        sink.record(INITIAL_SETUP, Some(&setup));
        shared.record(PROGRAM_STORED, None);

        assert_eq!(sink.names(), vec![INITIAL_SETUP, PROGRAM_STORED]);
        let first = &sink.events()[0];
        assert_eq!(first.properties.as_ref().unwrap()["cluster_id"], json!("c-1"));
        assert!(sink.events()[1].properties.is_none());

        // the caller keeps its properties
        assert_eq!(setup["cluster_id"], json!("c-1"));
    }
}
