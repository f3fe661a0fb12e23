//! Query processor: answers a natural-language query against a graph by
//! consulting an oracle, optionally narrowing the graph first.
//!
//! Pruning strategies run three phases over a [`Slicer`]:
//!
//! 1. **Time/location**: the oracle picks a time window and locations from the
//!    baseline's locations; the working copy is pruned by both.
//! 2. **Node selection**: the oracle picks object and event ids from summaries
//!    of what survived; the Slicer is reset, pruned to those nodes, and the
//!    phase-1 time window is applied again.
//! 3. **Answer**: the working copy is serialized as the optimal subgraph and
//!    sent with the query in a fresh conversation.
//!
//! Single-shot strategies send the whole baseline, minus the sections the
//! strategy ablates, in one call.

pub mod prompts;
pub mod reply;

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::GraphSnapshot;
use crate::graph::egg::EventGroundedGraph;
use crate::oracle::{ChatMessage, Oracle, OracleError, OracleReply, OracleRequest, ResponseFormat};
use crate::slice::Slicer;
use crate::temporal::{DATETIME_FORMAT, TimeRange};

use reply::{
    FinalAnswer, NodeSelection, NodeSelectionReply, TimeLocationReply, TimeLocationSelection,
    parse_reply,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Point in the retrieval state machine where a query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TimeLocation,
    NodeSelection,
    Answer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeLocation => write!(f, "time/location phase"),
            Self::NodeSelection => write!(f, "node selection phase"),
            Self::Answer => write!(f, "answer phase"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("oracle reply in the {phase} does not fit the expected shape: {message}")]
    #[diagnostic(
        code(egg::query::schema_violation),
        help("The query was aborted. Try a model that follows JSON output formats more reliably.")
    )]
    SchemaViolation { phase: Phase, message: String },

    #[error("oracle call failed in the {phase}")]
    #[diagnostic(
        code(egg::query::oracle),
        help("See the cause below. Transient failures are retried up to [oracle].transient_retries times.")
    )]
    Oracle {
        phase: Phase,
        #[source]
        source: OracleError,
    },

    #[error("failed to serialize graph payload: {message}")]
    #[diagnostic(code(egg::query::payload), help("This is a bug in the graph serializer."))]
    Payload { message: String },

    #[error("unknown retrieval strategy: \"{name}\"")]
    #[diagnostic(
        code(egg::query::unknown_strategy),
        help("Use one of: pruning_unified, pruning_unified_no_edge, spatial_only, event_only, no_edge, full_unified.")
    )]
    UnknownStrategy { name: String },
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How much of the graph the oracle sees, and whether it narrows it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Three phases; the answer payload keeps edges.
    #[default]
    PruningUnified,
    /// Three phases; the answer payload has no edges.
    PruningUnifiedNoEdge,
    /// Objects only.
    SpatialOnly,
    /// Events only.
    EventOnly,
    /// Objects and events, no edges.
    NoEdge,
    /// The whole graph.
    FullUnified,
}

impl RetrievalStrategy {
    pub const ALL: [Self; 6] = [
        Self::PruningUnified,
        Self::PruningUnifiedNoEdge,
        Self::SpatialOnly,
        Self::EventOnly,
        Self::NoEdge,
        Self::FullUnified,
    ];

    pub fn is_pruning(self) -> bool {
        matches!(self, Self::PruningUnified | Self::PruningUnifiedNoEdge)
    }

    /// Whether the answer payload keeps its edges.
    pub fn keeps_edges(self) -> bool {
        matches!(self, Self::PruningUnified | Self::FullUnified)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PruningUnified => "pruning_unified",
            Self::PruningUnifiedNoEdge => "pruning_unified_no_edge",
            Self::SpatialOnly => "spatial_only",
            Self::EventOnly => "event_only",
            Self::NoEdge => "no_edge",
            Self::FullUnified => "full_unified",
        }
    }

    /// Remove from `snapshot` the sections this strategy withholds from the oracle.
    pub fn shape_payload(self, snapshot: &mut GraphSnapshot) {
        if self != Self::FullUnified {
            snapshot.drop_involved_object_ids();
        }
        if !self.keeps_edges() {
            snapshot.drop_edges();
        }
        match self {
            Self::SpatialOnly => snapshot.drop_event_nodes(),
            Self::EventOnly => snapshot.drop_object_nodes(),
            _ => {}
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = QueryError;

    /// Accepts snake_case, kebab-case or upper-case names, plus the short
    /// forms `spatial`, `event` and `full`.
    fn from_str(s: &str) -> QueryResult<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let strategy = match normalized.as_str() {
            "spatial" => Self::SpatialOnly,
            "event" => Self::EventOnly,
            "full" => Self::FullUnified,
            other => Self::ALL
                .into_iter()
                .find(|strategy| strategy.as_str() == other)
                .ok_or_else(|| QueryError::UnknownStrategy { name: s.to_string() })?,
        };
        Ok(strategy)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Tokens consumed by oracle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn record(&mut self, reply: &OracleReply) {
        self.input_tokens += reply.input_tokens;
        self.output_tokens += reply.output_tokens;
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Everything a query produced.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub strategy: RetrievalStrategy,
    /// Raw phase-1 reply (pruning strategies only).
    pub phase_1_reply: Option<String>,
    /// Raw phase-2 reply (pruning strategies only).
    pub phase_2_reply: Option<String>,
    /// The answer exactly as the oracle gave it.
    pub answer_raw: String,
    /// The answer parsed against the final-answer schema, if it fits.
    pub answer: Option<FinalAnswer>,
    /// The payload the answer was produced from.
    pub subgraph: GraphSnapshot,
    /// Tokens spent on this query.
    pub usage: TokenUsage,
}

impl QueryOutcome {
    /// The structured `answer` field, or the raw reply for a free-text answer.
    pub fn answer_value(&self) -> serde_json::Value {
        match &self.answer {
            Some(answer) => answer.answer.clone(),
            None => serde_json::Value::String(self.answer_raw.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase decisions
// ---------------------------------------------------------------------------

/// Phase-1 decision: narrow to a time window, then to locations.
pub fn apply_time_location(slicer: &mut Slicer, selection: &TimeLocationSelection) {
    slicer.reset();
    slicer.prune_by_time_range(&selection.range);
    if selection.locations.is_empty() {
        tracing::warn!("oracle selected no location, every event is pruned");
    }
    slicer.prune_by_location(&selection.locations);
}

/// Phase-2 decision: restart from the baseline, keep the selected nodes, and
/// re-apply the phase-1 time window.
pub fn apply_node_selection(slicer: &mut Slicer, selection: &NodeSelection, range: &TimeRange) {
    slicer.reset();
    slicer.merge_events_and_objects(&selection.object_ids, &selection.event_ids);
    slicer.prune_by_time_range(range);
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Runs queries for one strategy over one Slicer.
///
/// A processor owns its Slicer; concurrent queries need one processor each,
/// built over the same shared baseline.
pub struct QueryProcessor<O: Oracle> {
    slicer: Slicer,
    oracle: O,
    strategy: RetrievalStrategy,
    current_time: String,
    transient_retries: u32,
    usage: TokenUsage,
}

impl<O: Oracle> QueryProcessor<O> {
    /// The current time defaults to the local wall clock at construction.
    pub fn new(slicer: Slicer, oracle: O, strategy: RetrievalStrategy) -> Self {
        Self {
            slicer,
            oracle,
            strategy,
            current_time: chrono::Local::now().format(DATETIME_FORMAT).to_string(),
            transient_retries: 0,
            usage: TokenUsage::default(),
        }
    }

    /// Current time quoted to the oracle, as `YYYY-MM-DD HH:MM:SS`.
    pub fn with_current_time(mut self, current_time: impl Into<String>) -> Self {
        self.current_time = current_time.into();
        self
    }

    /// Extra attempts for transient oracle failures.
    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.strategy
    }

    pub fn slicer(&self) -> &Slicer {
        &self.slicer
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Tokens spent by every query this processor has run, aborted ones included.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Answer `query` in the requested `modality`.
    ///
    /// Any phase whose reply does not parse aborts the query. The Slicer is
    /// reset first, so a failed query never affects the next one.
    pub fn process_query(&mut self, query: &str, modality: &str) -> QueryResult<QueryOutcome> {
        self.slicer.reset();
        tracing::info!(strategy = %self.strategy, %modality, query, "processing query");
        let mut usage = TokenUsage::default();
        let outcome = if self.strategy.is_pruning() {
            self.run_pruning(query, modality, &mut usage)
        } else {
            self.run_single_shot(query, modality, &mut usage)
        };
        self.usage.add(usage);
        match &outcome {
            Ok(outcome) => {
                tracing::info!(
                    structured = outcome.answer.is_some(),
                    input_tokens = outcome.usage.input_tokens,
                    output_tokens = outcome.usage.output_tokens,
                    "query answered"
                );
            }
            Err(err) => tracing::warn!(error = %err, "query aborted"),
        }
        outcome
    }

    fn run_pruning(
        &mut self,
        query: &str,
        modality: &str,
        usage: &mut TokenUsage,
    ) -> QueryResult<QueryOutcome> {
        let mut messages = vec![ChatMessage::system(prompts::system_prompt(
            self.strategy,
            &self.current_time,
            query,
            modality,
        ))];

        // Phase 1
        let locations = to_json(&self.slicer.locations())?;
        messages.push(ChatMessage::user(prompts::time_location_prompt(&locations)));
        let phase_1 = self.call(
            Phase::TimeLocation,
            OracleRequest::new(messages.clone(), ResponseFormat::TimeLocationRange),
            usage,
        )?;
        tracing::debug!(reply = %phase_1.content, "time/location reply");
        let time_location = parse_reply::<TimeLocationReply>(&phase_1.content, Phase::TimeLocation)?
            .selection()?;
        apply_time_location(&mut self.slicer, &time_location);
        tracing::info!(
            range = %time_location.range,
            locations = ?time_location.locations,
            stats = %self.slicer.working().stats(),
            "time/location phase done"
        );
        messages.push(ChatMessage::assistant(phase_1.content.clone()));

        // Phase 2
        let working = self.slicer.working();
        let objects = to_json(&working.objects_summary())?;
        let events = to_json(&working.events_summary())?;
        messages.push(ChatMessage::user(prompts::node_selection_prompt(&objects, &events)));
        let phase_2 = self.call(
            Phase::NodeSelection,
            OracleRequest::new(messages.clone(), ResponseFormat::NodeSelection),
            usage,
        )?;
        tracing::debug!(reply = %phase_2.content, "node selection reply");
        let nodes = parse_reply::<NodeSelectionReply>(&phase_2.content, Phase::NodeSelection)?
            .selection()?;
        apply_node_selection(&mut self.slicer, &nodes, &time_location.range);
        tracing::info!(
            objects = ?nodes.object_ids,
            events = ?nodes.event_ids,
            stats = %self.slicer.working().stats(),
            "node selection phase done"
        );

        // Phase 3
        let subgraph = self.payload(self.slicer.working());
        let answer_messages = vec![
            ChatMessage::system(prompts::answer_system_prompt(
                self.strategy,
                &self.current_time,
                query,
                modality,
            )),
            ChatMessage::user(prompts::graph_prompt(&to_json(&subgraph)?)),
        ];
        let (answer_raw, answer) = self.answer(answer_messages, usage)?;

        Ok(QueryOutcome {
            strategy: self.strategy,
            phase_1_reply: Some(phase_1.content),
            phase_2_reply: Some(phase_2.content),
            answer_raw,
            answer,
            subgraph,
            usage: *usage,
        })
    }

    fn run_single_shot(
        &mut self,
        query: &str,
        modality: &str,
        usage: &mut TokenUsage,
    ) -> QueryResult<QueryOutcome> {
        let subgraph = self.payload(self.slicer.baseline());
        let messages = vec![
            ChatMessage::system(prompts::system_prompt(
                self.strategy,
                &self.current_time,
                query,
                modality,
            )),
            ChatMessage::user(prompts::graph_prompt(&to_json(&subgraph)?)),
        ];
        let (answer_raw, answer) = self.answer(messages, usage)?;
        Ok(QueryOutcome {
            strategy: self.strategy,
            phase_1_reply: None,
            phase_2_reply: None,
            answer_raw,
            answer,
            subgraph,
            usage: *usage,
        })
    }

    fn payload(&self, graph: &EventGroundedGraph) -> GraphSnapshot {
        let mut snapshot = graph.serialize();
        self.strategy.shape_payload(&mut snapshot);
        snapshot
    }

    fn answer(
        &self,
        messages: Vec<ChatMessage>,
        usage: &mut TokenUsage,
    ) -> QueryResult<(String, Option<FinalAnswer>)> {
        let reply = self.call(
            Phase::Answer,
            OracleRequest::new(messages, ResponseFormat::FinalAnswer),
            usage,
        )?;
        tracing::debug!(reply = %reply.content, "answer reply");
        let answer = match parse_reply::<FinalAnswer>(&reply.content, Phase::Answer) {
            Ok(answer) => Some(answer),
            Err(err) => {
                tracing::debug!(error = %err, "free-text answer");
                None
            }
        };
        Ok((reply.content, answer))
    }

    /// One oracle round trip, retrying transient failures.
    fn call(
        &self,
        phase: Phase,
        request: OracleRequest,
        usage: &mut TokenUsage,
    ) -> QueryResult<OracleReply> {
        let mut attempt = 0;
        loop {
            match self.oracle.complete(&request) {
                Ok(reply) => {
                    usage.record(&reply);
                    return Ok(reply);
                }
                Err(err) if err.is_transient() && attempt < self.transient_retries => {
                    attempt += 1;
                    tracing::warn!(%phase, attempt, error = %err, "transient oracle failure, retrying");
                }
                Err(source) => return Err(QueryError::Oracle { phase, source }),
            }
        }
    }
}

impl<O: Oracle> fmt::Debug for QueryProcessor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("oracle", &self.oracle.name())
            .field("strategy", &self.strategy)
            .field("current_time", &self.current_time)
            .field("transient_retries", &self.transient_retries)
            .field("usage", &self.usage)
            .finish()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> QueryResult<String> {
    serde_json::to_string(value).map_err(|e| QueryError::Payload {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{EventNode, EventObjectEdge, ObjectNode};
    use crate::id::EntityId;
    use crate::oracle::ChatRole;
    use crate::oracle::scripted::ScriptedOracle;
    use crate::ordered::OrderedMap;
    use crate::temporal::Timestamp;

    fn id(raw: u64) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    /// Event 1 (kitchen, 100..200) involves mug 2; event 3 (office, 300..400)
    /// involves laptop 4. Edges 5 and 6.
    fn graph() -> Arc<EventGroundedGraph> {
        let mut g = EventGroundedGraph::default();
        let positions = |t: i64| OrderedMap::from_iter([(ts(t), [1.0, 2.0, 0.5])]);
        g.add_object(ObjectNode::new(id(2), "mug_0", "mug", positions(150)))
            .unwrap();
        g.add_object(ObjectNode::new(id(4), "laptop_0", "laptop", positions(350)))
            .unwrap();
        for (event, object, loc, start) in [(1, 2, "kitchen", 100), (3, 4, "office", 300)] {
            g.add_event(EventNode {
                id: id(event),
                event_description: format!("something in the {loc}"),
                start: ts(start),
                end: ts(start + 100),
                location: loc.into(),
                involved_object_ids: vec![id(object)],
                timestamped_observation_odom: OrderedMap::new(),
            })
            .unwrap();
        }
        for (edge, event, object) in [(5, 1, 2), (6, 3, 4)] {
            g.add_edge(EventObjectEdge {
                id: id(edge),
                source_node_id: id(event),
                target_node_id: id(object),
                object_role: "used".into(),
            })
            .unwrap();
        }
        Arc::new(g)
    }

    const ANSWER: &str = r#"{"answer": ["mug_0"], "modality": "node", "confidence": 0.9, "explanation": "event 1"}"#;

    #[test]
    fn strategy_names_round_trip() {
        for strategy in RetrievalStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<RetrievalStrategy>().unwrap(), strategy);
        }
        assert_eq!("PRUNING_UNIFIED".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::PruningUnified);
        assert_eq!("spatial".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::SpatialOnly);
        assert_eq!("no-edge".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::NoEdge);
        assert!("everything".parse::<RetrievalStrategy>().is_err());
    }

    #[test]
    fn payload_sections_per_strategy() {
        let g = graph();
        let shaped = |strategy: RetrievalStrategy| {
            let mut snapshot = g.serialize();
            strategy.shape_payload(&mut snapshot);
            snapshot
        };

        let full = shaped(RetrievalStrategy::FullUnified);
        assert!(full.edges.is_some());
        let events = full.nodes.event_nodes.as_ref().unwrap();
        assert!(events.values().all(|e| e.involved_object_ids.is_some()));

        let no_edge = shaped(RetrievalStrategy::NoEdge);
        assert!(no_edge.edges.is_none());
        assert!(no_edge.nodes.object_nodes.is_some());
        let events = no_edge.nodes.event_nodes.as_ref().unwrap();
        assert!(events.values().all(|e| e.involved_object_ids.is_none()));

        let spatial = shaped(RetrievalStrategy::SpatialOnly);
        assert!(spatial.nodes.event_nodes.is_none() && spatial.edges.is_none());
        let event = shaped(RetrievalStrategy::EventOnly);
        assert!(event.nodes.object_nodes.is_none() && event.edges.is_none());

        assert!(shaped(RetrievalStrategy::PruningUnified).edges.is_some());
        assert!(shaped(RetrievalStrategy::PruningUnifiedNoEdge).edges.is_none());
    }

    #[test]
    fn three_phase_flow() {
        let oracle = ScriptedOracle::new([
            r#"{"start_year": 0, "end_year": "inf", "locations": ["kitchen"]}"#,
            r#"{"object_nodes": [2], "event_nodes": [1]}"#,
            ANSWER,
        ]);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::PruningUnified)
            .with_current_time("2024-06-10 12:00:00");
        let outcome = processor.process_query("Which mug did I use?", "node").unwrap();

        assert_eq!(outcome.answer_value(), serde_json::json!(["mug_0"]));
        assert_eq!(outcome.answer.as_ref().unwrap().confidence, 0.9);
        assert_eq!(outcome.subgraph.object_ids(), vec![id(2)]);
        assert_eq!(outcome.subgraph.event_ids(), vec![id(1)]);
        assert_eq!(outcome.subgraph.edge_ids(), vec![id(5)]);
        assert!(outcome.phase_1_reply.is_some() && outcome.phase_2_reply.is_some());

        let requests = oracle.requests();
        assert_eq!(requests.len(), 3);
        // Phase 2 continues the phase-1 conversation.
        let roles: Vec<ChatRole> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]);
        assert!(requests[0].messages[1].content.contains("\"office\""));
        assert!(requests[1].messages[3].content.contains("mug_0"));
        assert!(!requests[1].messages[3].content.contains("laptop_0"));
        // Phase 3 starts over.
        assert_eq!(requests[2].messages.len(), 2);
        assert!(requests[2].messages[1].content.starts_with("graph: "));
        assert_eq!(requests[2].response_format, Some(ResponseFormat::FinalAnswer));

        let usage = processor.usage();
        assert_eq!(usage, outcome.usage);
        assert!(usage.input_tokens > 0 && usage.output_tokens > 0);
    }

    #[test]
    fn single_shot_sends_the_baseline() {
        let oracle = ScriptedOracle::new([ANSWER]);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::NoEdge);
        let outcome = processor.process_query("q", "node").unwrap();
        assert_eq!(outcome.subgraph.object_ids(), vec![id(2), id(4)]);
        assert!(outcome.subgraph.edges.is_none());
        assert!(outcome.phase_1_reply.is_none());
        assert_eq!(oracle.requests().len(), 1);
    }

    #[test]
    fn schema_violation_aborts_without_further_calls() {
        let oracle = ScriptedOracle::new(["I cannot help with that.", ANSWER, ANSWER]);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::PruningUnified);
        let err = processor.process_query("q", "text").unwrap_err();
        assert!(matches!(err, QueryError::SchemaViolation { phase: Phase::TimeLocation, .. }));
        assert_eq!(oracle.remaining(), 2);
    }

    #[test]
    fn free_text_answer_is_returned_as_is() {
        let reply = "The mug is in the kitchen.";
        let oracle = ScriptedOracle::new([reply]);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::FullUnified);
        let outcome = processor.process_query("Where is my mug?", "text").unwrap();
        assert_eq!(outcome.answer_raw, reply);
        assert!(outcome.answer.is_none());
        assert_eq!(outcome.answer_value(), serde_json::json!(reply));
    }

    #[test]
    fn aborted_query_still_counts_its_tokens() {
        let oracle = ScriptedOracle::new([
            r#"{"start_year": 0, "end_year": "inf", "locations": ["kitchen"]}"#,
            "no idea",
        ]);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::PruningUnified);
        let err = processor.process_query("q", "text").unwrap_err();
        assert!(matches!(err, QueryError::SchemaViolation { phase: Phase::NodeSelection, .. }));
        let usage = processor.usage();
        assert!(usage.input_tokens > 0);
        assert!(usage.output_tokens > 0);
    }

    #[test]
    fn transient_failures_are_retried_when_allowed() {
        let oracle = ScriptedOracle::default();
        oracle.push_error(OracleError::Timeout { timeout_secs: 1 });
        oracle.push_reply(ANSWER);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::FullUnified)
            .with_transient_retries(1);
        assert!(processor.process_query("q", "node").is_ok());

        oracle.push_error(OracleError::Timeout { timeout_secs: 1 });
        let mut no_retry = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::FullUnified);
        let err = no_retry.process_query("q", "node").unwrap_err();
        assert!(matches!(err, QueryError::Oracle { phase: Phase::Answer, .. }));
    }

    #[test]
    fn fatal_failures_are_not_retried() {
        let oracle = ScriptedOracle::default();
        oracle.push_error(OracleError::Http { status: 404, message: "no model".into() });
        oracle.push_reply(ANSWER);
        let mut processor = QueryProcessor::new(Slicer::new(graph()), &oracle, RetrievalStrategy::FullUnified)
            .with_transient_retries(3);
        assert!(processor.process_query("q", "node").is_err());
        assert_eq!(oracle.remaining(), 1);
    }

    #[test]
    fn node_selection_reapplies_the_time_window() {
        let mut slicer = Slicer::new(graph());
        let range = TimeRange::new(ts(0), ts(250)).unwrap();
        let selection = NodeSelection {
            object_ids: vec![id(2), id(4)],
            event_ids: vec![id(1), id(3)],
        };
        apply_node_selection(&mut slicer, &selection, &range);
        assert_eq!(slicer.working().events().ids(), vec![id(1)]);
        assert!(slicer.working().spatial().contains_object(id(2)));
        assert!(!slicer.working().spatial().contains_object(id(4)));
    }
}
