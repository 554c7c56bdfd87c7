// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Tracing setup and named-event reporting

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides `default_filter`.
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// A reported event
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub name: String,
    pub data: HashMap<String, Value>,
}

/// Reports named events to the log and the metrics registry
#[derive(Debug, Default)]
pub struct TelemetryReporter {
    /// Recent events kept for inspection
    recent: RwLock<Vec<TelemetryEvent>>,
    /// Number of recent events kept
    history: usize,
}

impl TelemetryReporter {
    pub fn new(history: usize) -> Self {
        Self {
            recent: RwLock::new(Vec::new()),
            history,
        }
    }

    /// Report a named event with structured data
    pub fn report_custom(&self, name: &str, data: HashMap<String, Value>) {
        let payload = Value::Object(data.clone().into_iter().collect());
        info!(event = name, data = %payload, "telemetry");
        metrics::increment_counter!("orb_events_total", "event" => name.to_string());

        if self.history == 0 {
            return;
        }

        let mut recent = self.recent.write();
        if recent.len() >= self.history {
            recent.remove(0);
        }
        recent.push(TelemetryEvent {
            name: name.to_string(),
            data,
        });
    }

    /// Recent events with the given name
    pub fn events_named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.recent
            .read()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

/// Build an event data map from key/value pairs
#[macro_export]
macro_rules! event_data {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut data = ::std::collections::HashMap::new();
        $(
            data.insert($key.to_string(), ::serde_json::json!($value));
        )*
        data
    }};
}
