//! Conversions between the wire [`Metric`](crate::model::Metric) and
//! the generated gRPC message, shared by the agent's opportunistic RPC
//! send path and the server's `MetricsService` (spec §4.7, design note
//! 3: "the gRPC client path dereferences Value and Delta unconditionally
//! ... an implementation must guard both fields" — handled here by
//! treating both as `Option`).

use crate::error::Error;
use crate::model::{Kind, Metric};

pub mod pb {
    tonic::include_proto!("metsys");
}

impl From<&Metric> for pb::Metric {
    fn from(m: &Metric) -> Self {
        pb::Metric {
            id: m.id.clone(),
            r#type: m.mtype.as_str().to_string(),
            value: m.value,
            delta: m.delta,
        }
    }
}

impl TryFrom<pb::Metric> for Metric {
    type Error = Error;

    fn try_from(m: pb::Metric) -> Result<Self, Error> {
        let mtype: Kind = m.r#type.parse()?;
        Ok(Metric {
            id: m.id,
            mtype,
            value: m.value,
            delta: m.delta,
        })
    }
}
