//! Vela Core
//!
//! Declarative provisioning planner and idempotent apply engine. Desired
//! infrastructure is expressed as a set of resource descriptors; the graph
//! builder validates their dependencies, the plan compiler orders them, and
//! the apply engine executes the plan against a provider adapter while the
//! state store keeps re-runs idempotent.

pub mod adapter;
pub mod descriptor;
pub mod engine;
pub mod graph;
pub mod manifest;
pub mod plan;
pub mod report;
pub mod retry;
pub mod state;
