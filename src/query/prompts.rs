//! Prompt text for each retrieval strategy and phase.

use super::RetrievalStrategy;

const MODALITIES: &str = "\
Answer modalities:
- node: a list of object node names, e.g. [\"bowl_1\", \"mug_2\"].
- text: a natural-language answer.
- binary: true or false.
- time_point: a timestamp formatted yyyy-mm-dd hh:mm:ss.
- time_interval: \"yyyy-mm-dd hh:mm:ss - yyyy-mm-dd hh:mm:ss\" (start - end).
- time_duration: a duration formatted hh:mm:ss.
- position: a 3D coordinate [x, y, z].";

const ANSWER_FORMAT: &str = "\
Reply with a single JSON object:
{\"answer\": <the answer in the requested modality, or \"None\" if the graph does not contain enough information>,
 \"modality\": <the requested modality>,
 \"confidence\": <0 to 1; lower it when the supporting events are far from the current time>,
 \"explanation\": <which object nodes, event nodes and edges support the answer, with their ids>}";

const PHASE_INSTRUCTIONS: &str = "\
You will narrow the graph in two steps before answering.

Step 1: you receive the locations where events happened. Pick the time window
and the locations relevant to the query. Reply with one JSON object:
{\"start_year\": <year, or 0 when the query names no time>, \"start_month\": <1-12>,
 \"start_day\": <1-31>, \"start_hour\": <0-23>, \"start_minute\": <0-59>,
 \"end_year\": <year, or \"inf\" when the query names no time>, \"end_month\": <1-12>,
 \"end_day\": <1-31>, \"end_hour\": <0-23>, \"end_minute\": <0-59>,
 \"locations\": <locations to search; all of them when the query names none>,
 \"explanation\": <why>}

Step 2: you receive the remaining object nodes as {id: {\"name\", \"description\"}} and
event nodes as {id: {\"start\", \"description\"}}. Pick the ids worth exploring.
To find the mug someone drank tea from, pick the tea-drinking events and the
mug objects; to follow what happened to the yellow bowl, pick that bowl.
Reply with one JSON object:
{\"object_nodes\": [<object ids>], \"event_nodes\": [<event ids>], \"explanation\": <why>}";

fn graph_description(strategy: RetrievalStrategy) -> &'static str {
    match strategy {
        RetrievalStrategy::PruningUnified | RetrievalStrategy::FullUnified => "\
The environment is a graph. 'nodes' holds 'object_nodes' and 'event_nodes', each keyed by a
unique node id. Object nodes carry a unique name, a class, a caption describing their
appearance and a history of timestamped positions. Event nodes carry a description, start and
end times, a location and the robot's odometry. 'edges' holds 'event_object_edges', linking an
event ('from_event') to an object ('to_object') with the role the object played in the event.",
        RetrievalStrategy::PruningUnifiedNoEdge | RetrievalStrategy::NoEdge => "\
The environment is a graph. 'nodes' holds 'object_nodes' and 'event_nodes', each keyed by a
unique node id. Object nodes carry a unique name, a class, a caption describing their
appearance and a history of timestamped positions. Event nodes carry a description, start and
end times, a location and the robot's odometry.",
        RetrievalStrategy::SpatialOnly => "\
The environment is a set of 'object_nodes', each keyed by a unique node id and carrying a
unique name, a class, a caption describing its appearance and a history of timestamped
positions.",
        RetrievalStrategy::EventOnly => "\
The environment is a set of 'event_nodes', each keyed by a unique node id and carrying a
description, start and end times, a location and the robot's odometry.",
    }
}

fn preamble(strategy: RetrievalStrategy, current_time: &str, query: &str, modality: &str) -> String {
    format!(
        "You are a robot assistant answering questions about what you observed in an environment.\n\
         {description}\n\n\
         The current time is {current_time}.\n\n\
         {MODALITIES}\n\n\
         Query: {query}\n\
         Requested modality: {modality}",
        description = graph_description(strategy),
    )
}

/// System prompt opening a query. Pruning strategies include the narrowing
/// instructions.
pub fn system_prompt(
    strategy: RetrievalStrategy,
    current_time: &str,
    query: &str,
    modality: &str,
) -> String {
    let mut prompt = preamble(strategy, current_time, query, modality);
    if strategy.is_pruning() {
        prompt.push_str("\n\n");
        prompt.push_str(PHASE_INSTRUCTIONS);
    }
    prompt.push_str("\n\nWhen you answer the query, ");
    prompt.push_str(ANSWER_FORMAT);
    prompt
}

/// System prompt for the answering phase of a pruning strategy.
pub fn answer_system_prompt(
    strategy: RetrievalStrategy,
    current_time: &str,
    query: &str,
    modality: &str,
) -> String {
    format!(
        "{}\n\nYou receive the part of the graph relevant to the query. {ANSWER_FORMAT}",
        preamble(strategy, current_time, query, modality)
    )
}

/// Phase-1 user message.
pub fn time_location_prompt(locations_json: &str) -> String {
    format!("Step 1. Locations where events happened: {locations_json}")
}

/// Phase-2 user message.
pub fn node_selection_prompt(objects_json: &str, events_json: &str) -> String {
    format!("Step 2.\nobject nodes: {objects_json}\nevent nodes: {events_json}")
}

/// User message carrying the graph to answer from.
pub fn graph_prompt(graph_json: &str) -> String {
    format!("graph: {graph_json}")
}
