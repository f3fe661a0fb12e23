//! Batch evaluation: run a list of QA cases through one strategy and record
//! every generated answer next to its ground truth.
//!
//! A failed query is recorded and the run moves on. Results are keyed by case
//! index, so a run interrupted halfway resumes where it stopped.

use std::path::Path;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::GraphSnapshot;
use crate::graph::egg::EventGroundedGraph;
use crate::oracle::Oracle;
use crate::ordered::OrderedMap;
use crate::query::{QueryProcessor, RetrievalStrategy, TokenUsage};
use crate::slice::Slicer;

#[derive(Debug, Error, Diagnostic)]
pub enum BenchError {
    #[error("I/O error on {path}")]
    #[diagnostic(
        code(egg::bench::io),
        help("Check that the file exists and its directory is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {message}")]
    #[diagnostic(
        code(egg::bench::json),
        help("QA cases are a JSON array of {{\"query\", \"modality\", \"answer\"}} objects; results are a map of case index to record.")
    )]
    Json { path: String, message: String },

    #[error("failed to start {jobs} worker threads: {message}")]
    #[diagnostic(code(egg::bench::workers), help("Lower --jobs."))]
    Workers { jobs: usize, message: String },
}

pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// One question with its expected answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaCase {
    pub query: String,
    pub modality: String,
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed { error: String },
}

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,
    pub modality: String,
    pub gt_answer: serde_json::Value,
    #[serde(default)]
    pub gen_answer: Option<serde_json::Value>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_subgraph: Option<GraphSnapshot>,
    #[serde(flatten)]
    pub status: RecordStatus,
}

impl QueryRecord {
    pub fn succeeded(&self) -> bool {
        self.status == RecordStatus::Succeeded
    }
}

/// Case index → record.
pub type BenchResults = OrderedMap<usize, QueryRecord>;

/// Totals for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BenchSummary {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub usage: TokenUsage,
}

impl BenchSummary {
    fn count(&mut self, record: &QueryRecord) {
        if record.succeeded() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.usage.input_tokens += record.input_tokens;
        self.usage.output_tokens += record.output_tokens;
    }
}

/// Runs QA cases against a shared read-only baseline. Each case gets its own
/// Slicer and processor.
#[derive(Debug)]
pub struct BatchRunner<O: Oracle> {
    baseline: Arc<EventGroundedGraph>,
    oracle: O,
    strategy: RetrievalStrategy,
    current_time: Option<String>,
    transient_retries: u32,
}

impl<O: Oracle> BatchRunner<O> {
    pub fn new(baseline: Arc<EventGroundedGraph>, oracle: O, strategy: RetrievalStrategy) -> Self {
        Self {
            baseline,
            oracle,
            strategy,
            current_time: None,
            transient_retries: 0,
        }
    }

    /// Fixed current time for every case, instead of the wall clock.
    pub fn with_current_time(mut self, current_time: Option<String>) -> Self {
        self.current_time = current_time;
        self
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Answer one case. Never fails: errors become a `Failed` record.
    pub fn run_case(&self, case: &QaCase) -> QueryRecord {
        let mut processor = QueryProcessor::new(
            Slicer::new(Arc::clone(&self.baseline)),
            &self.oracle,
            self.strategy,
        )
        .with_transient_retries(self.transient_retries);
        if let Some(now) = &self.current_time {
            processor = processor.with_current_time(now.clone());
        }

        match processor.process_query(&case.query, &case.modality) {
            Ok(outcome) => QueryRecord {
                query: case.query.clone(),
                modality: case.modality.clone(),
                gt_answer: case.answer.clone(),
                gen_answer: Some(outcome.answer_value()),
                input_tokens: outcome.usage.input_tokens,
                output_tokens: outcome.usage.output_tokens,
                optimal_subgraph: Some(outcome.subgraph),
                status: RecordStatus::Succeeded,
            },
            Err(err) => {
                let usage = processor.usage();
                QueryRecord {
                    query: case.query.clone(),
                    modality: case.modality.clone(),
                    gt_answer: case.answer.clone(),
                    gen_answer: None,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    optimal_subgraph: None,
                    status: RecordStatus::Failed {
                        error: err.to_string(),
                    },
                }
            }
        }
    }

    /// Run every case not yet in `results`, in order, calling `checkpoint`
    /// after each new record.
    pub fn run(
        &self,
        cases: &[QaCase],
        results: &mut BenchResults,
        mut checkpoint: impl FnMut(&BenchResults) -> BenchResult<()>,
    ) -> BenchResult<BenchSummary> {
        let mut summary = BenchSummary::default();
        for (index, case) in cases.iter().enumerate() {
            if results.contains_key(&index) {
                tracing::info!(index, "skipping case with an existing record");
                summary.skipped += 1;
                continue;
            }
            let record = self.run_case(case);
            if let RecordStatus::Failed { error } = &record.status {
                tracing::warn!(index, query = %case.query, %error, "case failed");
            }
            summary.count(&record);
            results.insert(index, record);
            checkpoint(results)?;
        }
        tracing::info!(?summary, "batch finished");
        Ok(summary)
    }

    /// Like [`Self::run`], with `jobs` cases in flight at once. New records
    /// are added in case order once all of them are done.
    pub fn run_parallel(
        &self,
        cases: &[QaCase],
        results: &mut BenchResults,
        jobs: usize,
    ) -> BenchResult<BenchSummary> {
        use rayon::prelude::*;

        let pending: Vec<(usize, &QaCase)> = cases
            .iter()
            .enumerate()
            .filter(|(index, _)| !results.contains_key(index))
            .collect();
        let mut summary = BenchSummary {
            skipped: cases.len() - pending.len(),
            ..BenchSummary::default()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
            .map_err(|e| BenchError::Workers {
                jobs,
                message: e.to_string(),
            })?;
        let records: Vec<(usize, QueryRecord)> = pool.install(|| {
            pending
                .par_iter()
                .map(|(index, case)| (*index, self.run_case(case)))
                .collect()
        });

        for (index, record) in records {
            summary.count(&record);
            results.insert(index, record);
        }
        tracing::info!(?summary, jobs, "parallel batch finished");
        Ok(summary)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> BenchResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| BenchError::Json {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load QA cases from a JSON array.
pub fn load_cases(path: &Path) -> BenchResult<Vec<QaCase>> {
    read_json(path)
}

/// Load earlier results, or start empty if `path` does not exist yet.
pub fn load_results(path: &Path) -> BenchResult<BenchResults> {
    if !path.exists() {
        return Ok(BenchResults::new());
    }
    let results: BenchResults = read_json(path)?;
    tracing::info!(path = %path.display(), records = results.len(), "resuming from earlier results");
    Ok(results)
}

/// Rewrite `path` with `results`.
pub fn write_results(path: &Path, results: &BenchResults) -> BenchResult<()> {
    let json = serde_json::to_string_pretty(results).map_err(|e| BenchError::Json {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| BenchError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
