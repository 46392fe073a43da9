//! `metsys` — a small-scale metrics telemetry pipeline: an agent that
//! samples runtime/host metrics and a server that ingests, stores, and
//! serves them over HTTP and gRPC.

pub mod agent;
pub mod buildinfo;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod retry;
pub mod server;
pub mod storage;
pub mod wire_pb;
