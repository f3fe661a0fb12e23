//! Rich diagnostic error types for the egg-graph engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it. Lookup misses are deliberately absent: a missing
//! node is reported as `None` plus a warning, never as an error.

use miette::Diagnostic;
use thiserror::Error;

use crate::bench::BenchError;
use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::oracle::OracleError;
use crate::query::QueryError;
use crate::temporal::TemporalError;

/// Top-level error type for the egg-graph engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum EggError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Temporal(#[from] TemporalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bench(#[from] BenchError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("edge {edge_id} references a missing {missing} node {node_id}")]
    #[diagnostic(
        code(egg::graph::dangling_edge),
        help(
            "Event-object edges may only connect an existing event node to an \
             existing object node. Add both endpoints before creating the edge."
        )
    )]
    DanglingEdge {
        edge_id: u64,
        node_id: u64,
        missing: &'static str,
    },

    #[error("identifier {id} is already in use")]
    #[diagnostic(
        code(egg::graph::duplicate_id),
        help(
            "Objects, events and edges share one identifier space. \
             A snapshot containing the same id twice is corrupt; re-export it."
        )
    )]
    DuplicateId { id: u64 },

    #[error("event {id} ends before it starts ({start_ns} > {end_ns})")]
    #[diagnostic(
        code(egg::graph::inverted_event),
        help("An event's start timestamp must not be later than its end timestamp.")
    )]
    InvertedEvent { id: u64, start_ns: i64, end_ns: i64 },

    #[error("object {id} has no observations")]
    #[diagnostic(
        code(egg::graph::empty_history),
        help("An object node needs at least one timestamped position before it can be stored.")
    )]
    EmptyHistory { id: u64 },

    #[error("identifier space exhausted: cannot allocate more than u64::MAX entities")]
    #[diagnostic(
        code(egg::graph::id_exhausted),
        help(
            "The entity ID space is exhausted. This requires 2^64 allocations; \
             check for an ID allocation loop."
        )
    )]
    IdSpaceExhausted,
}

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Snapshot (persistence) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("I/O error on {path}")]
    #[diagnostic(
        code(egg::snapshot::io),
        help("Check that the file exists and that you have read/write permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed graph snapshot: {message}")]
    #[diagnostic(
        code(egg::snapshot::json),
        help(
            "The file is not a valid graph snapshot. It must contain `nodes.object_nodes`, \
             `nodes.event_nodes` and `edges.event_object_edges`."
        )
    )]
    Json { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Temporal(#[from] TemporalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

/// Convenience alias for functions returning egg-graph results.
pub type EggResult<T> = std::result::Result<T, EggError>;
