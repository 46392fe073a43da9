//! The atomic metric type shared by the agent and the server.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GAUGE: &str = "gauge";
pub const COUNTER: &str = "counter";

/// Network timeout applied to a single outbound report request.
pub const SEND_METRIC_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the number of attempts any retry loop in this crate makes.
pub const MAX_ERR_RETRY_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Gauge,
    Counter,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Gauge => GAUGE,
            Kind::Counter => COUNTER,
        }
    }
}

impl std::str::FromStr for Kind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE => Ok(Kind::Gauge),
            COUNTER => Ok(Kind::Counter),
            other => Err(crate::error::Error::BadRequest(format!(
                "unknown metric type: {other}"
            ))),
        }
    }
}

/// The wire/storage representation of a metric.
///
/// `value` is populated iff `mtype` is `gauge`; `delta` iff `counter`.
/// Both are plain `Option`s rather than default-elided fields so that
/// an explicit `0` survives JSON round-tripping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: Kind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: Kind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: Kind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Checks the kind/field-presence invariant on an inbound request payload.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.id.is_empty() {
            return Err(crate::error::Error::BadRequest("empty id".into()));
        }
        match self.mtype {
            Kind::Gauge if self.value.is_none() => {
                Err(crate::error::Error::BadRequest("gauge missing value".into()))
            }
            Kind::Counter if self.delta.is_none() => {
                Err(crate::error::Error::BadRequest("counter missing delta".into()))
            }
            _ => Ok(()),
        }
    }
}
