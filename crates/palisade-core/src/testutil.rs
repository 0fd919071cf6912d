//! Test utilities: scripted fetchers and operations.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::{Ready, ready};

use crate::error::AppError;
use crate::rate_limiter::EnhancedOptions;
use crate::traits::Fetcher;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns scripted responses and records every call.
#[derive(Clone, Default)]
pub struct MockFetcher {
    /// Each call pops the first element. If empty, returns a default body.
    responses: Arc<Mutex<VecDeque<Result<String, AppError>>>>,
    calls: Arc<Mutex<Vec<(String, EnhancedOptions)>>>,
}

impl MockFetcher {
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<(String, EnhancedOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, options: &EnhancedOptions) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("<html><body>default</body></html>".to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedOperation
// ---------------------------------------------------------------------------

/// Zero-argument operation that replays a script of results and counts invocations.
pub struct ScriptedOperation<T> {
    script: Mutex<VecDeque<Result<T, AppError>>>,
    calls: Mutex<usize>,
}

impl<T> ScriptedOperation<T> {
    pub fn new(script: Vec<Result<T, AppError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    /// `times` failures produced by `error`.
    pub fn repeat(error: fn() -> AppError, times: usize) -> Self {
        Self::new((0..times).map(|_| Err(error())).collect())
    }

    /// Pop the next scripted result. An exhausted script fails with `Generic`.
    pub fn invoke(&self) -> Ready<Result<T, AppError>> {
        *self.calls.lock().unwrap() += 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Generic("script exhausted".into())));
        ready(next)
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}
