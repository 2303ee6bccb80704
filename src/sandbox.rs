use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::answers::{AnswerEcho, ValidatedAnswer};
use crate::catalog::{AnswerSpec, Problem};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 60;
const VERDICT_CACHE_SIZE: usize = 200;

/// Consecutive failed runs after which submissions stop being sent.
const FAILURE_THRESHOLD: u32 = 3;
/// How long the client waits before probing the endpoint again.
const COOLDOWN: Duration = Duration::from_secs(60);

/// Reusable HTTP client singleton (created once, reused for all requests).
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client")
    })
}

#[derive(Serialize)]
struct SandboxRequest<'a> {
    problem_id: &'a str,
    tests: &'a str,
    code: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct SandboxResponse {
    status: String,
}

/// Health of the sandbox endpoint as seen from this process. A run that
/// cannot be completed (connection refused, bad response body) counts as a
/// failure; enough of them in a row marks the sandbox down, and submissions
/// are refused outright until the cooldown passes. The first call after the
/// cooldown goes through as a probe.
struct SandboxHealth {
    consecutive_failures: u32,
    down_since: Option<Instant>,
    cooldown: Duration,
}

impl SandboxHealth {
    fn new(cooldown: Duration) -> Self {
        SandboxHealth {
            consecutive_failures: 0,
            down_since: None,
            cooldown,
        }
    }

    /// Whether a submission should be sent right now. Leaving the cooldown
    /// window resets the failure count so the probe starts a fresh streak.
    fn available(&mut self) -> bool {
        match self.down_since {
            None => true,
            Some(since) if since.elapsed() >= self.cooldown => {
                self.down_since = None;
                self.consecutive_failures = 0;
                true
            }
            Some(_) => false,
        }
    }

    fn note_success(&mut self) {
        self.consecutive_failures = 0;
        self.down_since = None;
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            self.down_since = Some(Instant::now());
        }
    }
}

/// Client for the external code-execution sandbox. Identical submissions are
/// served from an LRU cache; a sandbox that keeps failing is marked down so
/// it does not stall every submission.
pub struct SandboxClient {
    url: String,
    auth_header: String,
    health: Mutex<SandboxHealth>,
    verdicts: Mutex<LruCache<u64, bool>>,
}

impl SandboxClient {
    pub fn new(config: &EngineConfig) -> Self {
        SandboxClient {
            url: config.sandbox_url.clone(),
            auth_header: config.sandbox_auth_header.clone(),
            health: Mutex::new(SandboxHealth::new(COOLDOWN)),
            verdicts: Mutex::new(LruCache::new(
                NonZeroUsize::new(VERDICT_CACHE_SIZE).expect("cache size > 0"),
            )),
        }
    }

    fn cache_key(problem_id: &str, code: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        problem_id.hash(&mut hasher);
        code.hash(&mut hasher);
        hasher.finish()
    }

    /// Run the submitted code against the problem's tests. The coefficient is
    /// binary: 1.0 when the sandbox reports "OK", otherwise 0.0.
    pub async fn evaluate(&self, problem: &Problem, code: &str) -> Result<ValidatedAnswer> {
        let tests = match &problem.answer {
            AnswerSpec::Code { tests } => tests.as_str(),
            _ => {
                return Err(EngineError::inconsistency(format!(
                    "problem {} is not a code problem",
                    problem.id
                )))
            }
        };
        if code.trim().is_empty() {
            return Err(EngineError::bad_payload("empty code submission"));
        }
        if self.url.is_empty() {
            return Err(EngineError::Sandbox {
                reason: "sandbox endpoint is not configured".into(),
            });
        }

        let key = Self::cache_key(&problem.id, code);
        if let Some(&passed) = self.verdicts.lock().peek(&key) {
            tracing::debug!(problem = %problem.id, "Sandbox verdict cache hit");
            return Ok(Self::verdict(passed, code));
        }

        if !self.health.lock().available() {
            return Err(EngineError::Sandbox {
                reason: "sandbox is cooling down after repeated failures".into(),
            });
        }

        let response = get_http_client()
            .post(&self.url)
            .header("Authorization", &self.auth_header)
            .json(&SandboxRequest {
                problem_id: &problem.id,
                tests,
                code,
            })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.health.lock().note_failure();
                tracing::warn!(problem = %problem.id, error = %e, "Sandbox call failed");
                return Err(e.into());
            }
        };
        let verdict: SandboxResponse = match response.json().await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.health.lock().note_failure();
                return Err(e.into());
            }
        };
        self.health.lock().note_success();

        let passed = verdict.status == "OK";
        self.verdicts.lock().put(key, passed);
        tracing::info!(problem = %problem.id, passed, "Sandbox verdict");
        Ok(Self::verdict(passed, code))
    }

    fn verdict(passed: bool, code: &str) -> ValidatedAnswer {
        ValidatedAnswer {
            coefficient: if passed { 1.0 } else { 0.0 },
            echo: AnswerEcho::Text(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_failures_mark_the_sandbox_down() {
        let mut health = SandboxHealth::new(Duration::from_secs(60));
        health.note_failure();
        assert!(health.available());
        health.note_failure();
        assert!(health.available());
        health.note_failure();
        assert!(!health.available());
    }

    #[test]
    fn a_success_clears_the_failure_streak() {
        let mut health = SandboxHealth::new(Duration::from_secs(60));
        health.note_failure();
        health.note_failure();
        health.note_success();
        health.note_failure();
        health.note_failure();
        assert!(health.available());
    }

    #[test]
    fn cooldown_expiry_lets_a_probe_through() {
        let mut health = SandboxHealth::new(Duration::ZERO);
        for _ in 0..3 {
            health.note_failure();
        }
        // Zero cooldown: the next check half-opens immediately and resets
        // the streak.
        assert!(health.available());
        health.note_failure();
        health.note_failure();
        assert!(health.available());
    }
}
