use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{GenerationConfig, LlmClient, LlmError};

/// Mock LLM client for testing. Returns a configurable response.
pub struct MockLlmClient {
    response: String,
    available: bool,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            response: String::new(),
            available: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        _prompt: &str,
        _system: &str,
        _config: &GenerationConfig,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(LlmError::Unreachable("mock endpoint down".into()));
        }
        Ok(self.response.clone())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

/// Scripted mock returning one queued outcome per call, then repeating the
/// last one. Drives the validator's retry scenarios.
pub struct SequenceLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    calls: AtomicUsize,
}

impl SequenceLlmClient {
    pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
        let queue = responses
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Self {
            responses: Mutex::new(queue),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for SequenceLlmClient {
    fn generate(
        &self,
        _prompt: &str,
        _system: &str,
        _config: &GenerationConfig,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.responses.lock().unwrap();
        let next = match queue.pop_front() {
            Some(outcome) => {
                *self.last.lock().unwrap() = Some(outcome.clone());
                outcome
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err("sequence exhausted".to_string())),
        };
        next.map_err(LlmError::Unreachable)
    }

    fn is_available(&self) -> bool {
        true
    }
}
