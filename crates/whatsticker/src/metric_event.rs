//! Metric events that travel through the metrics queue from the bot to the
//! logger.

use crate::error::DeserializeError;
use crate::prelude::*;
use crate::Result;
use metrics::Label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum MetricEvent {
    Counter {
        name: String,
        value: u64,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
    Gauge {
        name: String,
        value: f64,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
    Histogram {
        name: String,
        value: f64,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
}

impl MetricEvent {
    pub(crate) fn counter<'a>(
        name: &str,
        value: u64,
        labels: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self::Counter {
            name: name.to_owned(),
            value,
            labels: labels
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        }
    }

    pub(crate) fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(err_ctx!(DeserializeError::Json {
            target_ty: "MetricEvent",
            input: payload,
        }))
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(err_ctx!(DeserializeError::SerializeJson {
            source_ty: "MetricEvent"
        }))
    }

    /// Applies the event to the globally installed metrics recorder
    pub(crate) fn record(self) {
        match self {
            Self::Counter {
                name,
                value,
                labels,
            } => metrics::register_counter!(name, into_labels(labels)).increment(value),
            Self::Gauge {
                name,
                value,
                labels,
            } => metrics::register_gauge!(name, into_labels(labels)).set(value),
            Self::Histogram {
                name,
                value,
                labels,
            } => metrics::register_histogram!(name, into_labels(labels)).record(value),
        }
    }
}

fn into_labels(labels: BTreeMap<String, String>) -> Vec<Label> {
    labels
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use expect_test::expect;

    #[test]
    fn json_format() {
        let event = MetricEvent::counter(
            "whatsticker_stickerize_requests_total",
            1,
            [("media_type", "video"), ("origin", "quoted")],
        );

        expect![[r#"{"kind":"counter","name":"whatsticker_stickerize_requests_total","value":1,"labels":{"media_type":"video","origin":"quoted"}}"#]]
            .assert_eq(&event.to_json().unwrap());

        let gauge = MetricEvent::from_json(r#"{"kind":"gauge","name":"queue_len","value":2.5}"#)
            .unwrap();

        assert_eq!(
            gauge,
            MetricEvent::Gauge {
                name: "queue_len".to_owned(),
                value: 2.5,
                labels: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn malformed_payload() {
        let err = MetricEvent::from_json(r#"{"kind":"summary","name":"x","value":1}"#).unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Deserialize {
                source: DeserializeError::Json { target_ty: "MetricEvent", .. }
            }
        );
    }
}
