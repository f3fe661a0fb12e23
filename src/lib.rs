// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # egg-graph
//!
//! Event-grounded graphs for robot memory: objects, rooms and events observed
//! over time, linked by event-object edges, and a query processor that narrows
//! the graph with a language model before answering.
//!
//! ## Architecture
//!
//! - **Graph** (`graph`): spatial index (objects, rooms), event index, and the
//!   event-grounded graph tying them together with edges
//! - **Ingestion** (`ingest`): turns perception observations into nodes and edges
//! - **Persistence** (`export`): the JSON snapshot schema
//! - **Slicing** (`slice`): a read-only baseline plus a prunable working copy
//! - **Retrieval** (`query`, `oracle`): strategy-driven query processing against
//!   a pluggable language-model oracle
//! - **Evaluation** (`bench`): batch runs over QA sets
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use egg_graph::export::GraphSnapshot;
//! use egg_graph::graph::egg::EventGroundedGraph;
//! use egg_graph::graph::matcher::MatcherMode;
//! use egg_graph::oracle::ollama::{OllamaConfig, OllamaOracle};
//! use egg_graph::query::{QueryProcessor, RetrievalStrategy};
//! use egg_graph::slice::Slicer;
//!
//! let snapshot = GraphSnapshot::read_from(Path::new("graph.json")).unwrap();
//! let graph = EventGroundedGraph::deserialize(&snapshot, MatcherMode::GroundTruth.build(0.9)).unwrap();
//! let oracle = OllamaOracle::new(OllamaConfig::default());
//! let mut processor = QueryProcessor::new(
//!     Slicer::new(Arc::new(graph)),
//!     oracle,
//!     RetrievalStrategy::PruningUnified,
//! );
//! let outcome = processor.process_query("Where did I leave my mug?", "position").unwrap();
//! println!("{}", outcome.answer_value());
//! ```

pub mod bench;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod id;
pub mod ingest;
pub mod oracle;
pub mod ordered;
pub mod query;
pub mod slice;
pub mod temporal;
