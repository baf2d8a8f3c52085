//! The coordination kernel: TaskGraph, Scheduler, AssignmentStore,
//! LeaseMonitor, ContextService, DecisionLog/ArtifactStore, RetryPlanner,
//! ProjectBuilder/ProjectRegistry, the `KanbanProvider` trait and its
//! registry, the circuit breaker, and the error taxonomy.
//!
//! No transport or persistence wiring lives here -- `marcus-db` owns SQL,
//! `marcus-cli` owns the MCP surface and process bootstrap.

pub mod artifact;
pub mod assignment;
pub mod circuit_breaker;
pub mod context;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod lease_monitor;
pub mod project;
pub mod provider;
pub mod retry;
pub mod scheduler;

pub use dispatcher::ToolDispatcher;
pub use error::{MarcusError, Result};
