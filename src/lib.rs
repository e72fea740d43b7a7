// Grantmesh — federated grant-search mesh.
//
// A fleet of funding-body agents each owns a private vector collection;
// one orchestrator routes free-text queries to the relevant agents in
// parallel, re-ranks the union and returns a unified answer.
//
// Layering:
//   atoms/  — pure data types, constants, errors (no I/O)
//   engine/ — protocol, agents, routing, cache, orchestrator
//
// The HTTP surface, vector backend and embedding model live outside this
// crate; `engine::vector::VectorIndex` and `engine::embedder::TextEncoder`
// are the seams they plug into.

pub mod atoms;
pub mod engine;

pub use atoms::error::{ErrorCode, MeshError, MeshResult};
pub use atoms::types::{
    AggregatedResponse, GrantRecord, QueryFilters, QueryRequest, ScoredGrant,
};
pub use engine::agent::{Agent, AgentBlueprint};
pub use engine::config::MeshConfig;
pub use engine::orchestrator::Orchestrator;
pub use engine::routing::RoutingStrategy;
pub use engine::simp::{Envelope, EnvelopeLog, Intent, MessageKind, Payload};
