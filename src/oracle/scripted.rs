//! Canned-reply oracle.
//!
//! Serves queued replies in order and records every request, so a whole
//! query can be replayed deterministically without a model.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Oracle, OracleError, OracleReply, OracleRequest, OracleResult};

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleResult<OracleReply>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    /// An oracle that answers with `replies`, one per call.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let oracle = Self::default();
        for reply in replies {
            oracle.push_reply(reply);
        }
        oracle
    }

    /// Queue a reply. Token counts are whitespace-separated word counts.
    pub fn push_reply(&self, content: impl Into<String>) {
        let content = content.into();
        let output_tokens = word_count(&content);
        self.lock_replies().push_back(Ok(OracleReply {
            content,
            input_tokens: 0,
            output_tokens,
        }));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: OracleError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<OracleResult<OracleReply>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply> {
        let served = {
            let mut requests = self
                .requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            requests.push(request.clone());
            requests.len() - 1
        };
        let input_tokens = request
            .messages
            .iter()
            .map(|m| word_count(&m.content))
            .sum();
        match self.lock_replies().pop_front() {
            Some(Ok(reply)) => Ok(OracleReply {
                input_tokens,
                ..reply
            }),
            Some(Err(err)) => Err(err),
            None => Err(OracleError::Exhausted { served }),
        }
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
