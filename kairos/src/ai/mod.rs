//! Language-model text service.
//!
//! Every call resolves to text. Transport failures, API errors and a missing
//! credential all degrade to a canned response picked from the prompt, and
//! only `last_error` records what went wrong.

pub mod backend;
pub mod fallback;
pub mod prompts;

use crate::config::AiConfig;
use kairos_ipc::AiStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use backend::{CompletionBackend, OpenAiBackend};

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request timed out")]
    Timeout,
}

#[derive(Clone)]
pub struct AiTextService {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Option<Arc<dyn CompletionBackend>>,
    simulated_delay: Duration,
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

/// Keeps `is_loading` accurate even when a request task is aborted mid-flight.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AiTextService {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>, simulated_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                simulated_delay,
                in_flight: AtomicUsize::new(0),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn offline(simulated_delay: Duration) -> Self {
        Self::new(None, simulated_delay)
    }

    pub fn from_config(config: &AiConfig) -> Self {
        let delay = Duration::from_millis(config.simulated_delay_ms);
        let Some(api_key) = config.resolve_api_key() else {
            info!("No API key configured; AI responses will use built-in text");
            return Self::offline(delay);
        };
        match OpenAiBackend::new(config, api_key) {
            Ok(backend) => {
                info!(model = %config.model, "AI text service online");
                Self::new(Some(Arc::new(backend)), delay)
            }
            Err(e) => {
                warn!("Failed to build AI client, falling back to built-in text: {}", e);
                let service = Self::offline(delay);
                service.record_error(&e);
                service
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn status(&self) -> AiStatus {
        AiStatus {
            online: self.is_online(),
            is_loading: self.is_loading(),
            last_error: self.last_error(),
        }
    }

    pub async fn generate(&self, prompt: &str) -> String {
        self.generate_with_fallback(prompt, fallback::for_prompt(prompt).to_string())
            .await
    }

    pub async fn generate_with_fallback(&self, prompt: &str, fallback: String) -> String {
        let _loading = LoadingGuard::new(&self.inner.in_flight);

        let Some(backend) = self.inner.backend.as_ref() else {
            tokio::time::sleep(self.inner.simulated_delay).await;
            return fallback;
        };

        match backend.complete(prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                if let Ok(mut last) = self.inner.last_error.lock() {
                    *last = None;
                }
                text.trim().to_string()
            }
            Ok(_) => {
                self.record_error(&AiError::Malformed("empty completion".to_string()));
                fallback
            }
            Err(e) => {
                warn!("AI request failed, using fallback text: {}", e);
                self.record_error(&e);
                fallback
            }
        }
    }

    fn record_error(&self, error: &AiError) {
        if let Ok(mut last) = self.inner.last_error.lock() {
            *last = Some(error.to_string());
        }
    }
}
