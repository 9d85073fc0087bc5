//! # Retry Policy
//!
//! Decides whether a failed job is retried and when. Classification looks at
//! the upstream status code first, then the error category, then the
//! message text. Permanent errors never retry; unclassifiable errors retry
//! until the job's ceiling is reached.

use std::sync::LazyLock;
use std::time::Duration;

use rand::{Rng, thread_rng};
use regex::Regex;
use serde::Serialize;

use crate::config::RetryConfig;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::models::{JobModel, JobStatus};

static TRANSIENT_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(time[ds]? ?out|timed out|connection (refused|reset|closed|aborted)|connect(ion)? error|temporar(y|ily)|unavailable|rate[ -]?limit(ed)?|too many requests|throttl(ed|ing)|try again|network|broken pipe|eof)\b",
    )
    .unwrap()
});

static PERMANENT_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(not found|does not exist|no such|unauthori[sz]ed|forbidden|invalid (credentials|token|input|parameter|argument)s?|authentication failed|permission denied|malformed|bad request|parse error|validation failed|account (suspended|deleted|private))\b",
    )
    .unwrap()
});

const TRANSIENT_CATEGORIES: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "rate_limit",
    "rate_limited",
    "throttled",
    "server_error",
    "unavailable",
];

const PERMANENT_CATEGORIES: &[&str] = &[
    "not_found",
    "auth",
    "authentication",
    "authorization",
    "forbidden",
    "invalid_input",
    "validation",
    "malformed",
    "bad_request",
];

/// Caps the exponent so `2^n` stays finite for absurd retry counts.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryDecision {
    pub retry: bool,
    /// Delay before the next attempt; zero when not retrying
    pub delay: Duration,
    pub classification: ExecutionErrorKind,
    pub reason: String,
}

/// Exponential backoff retry policy with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_pct: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_pct: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter_pct)
    }

    /// Decides whether `job` should be retried after `error`.
    pub fn should_retry(&self, job: &JobModel, error: &ExecutionError) -> RetryDecision {
        let classification = classify(error);

        if job.status == JobStatus::Cancelled {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                classification,
                reason: "job was cancelled".to_string(),
            };
        }

        if job.retry_count >= job.max_retries {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                classification,
                reason: format!(
                    "retry ceiling reached ({}/{})",
                    job.retry_count, job.max_retries
                ),
            };
        }

        if classification == ExecutionErrorKind::Permanent {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
                classification,
                reason: "permanent error".to_string(),
            };
        }

        let retry_count = job.retry_count.max(0) as u32;
        let delay = self.delay(retry_count);
        RetryDecision {
            retry: true,
            delay,
            classification,
            reason: format!(
                "{} error, attempt {} of {}",
                classification.as_str(),
                retry_count + 1,
                job.max_retries
            ),
        }
    }

    /// Deterministic part of the delay: `min(base * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(MAX_BACKOFF_EXPONENT) as i32;
        let seconds = self.base_delay.as_secs_f64() * 2_f64.powi(exponent);
        Duration::from_secs_f64(seconds.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff plus uniform jitter in `[0, jitter_pct * backoff]`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let backoff = self.backoff(retry_count).as_secs_f64();
        let jitter = thread_rng().gen_range(0.0..=(self.jitter_pct * backoff));
        Duration::from_secs_f64(backoff + jitter)
    }
}

/// Classifies an execution error as transient or permanent. Errors that
/// carry an explicit kind keep it; otherwise the status code, category and
/// message are inspected in that order.
pub fn classify(error: &ExecutionError) -> ExecutionErrorKind {
    if error.kind != ExecutionErrorKind::Unclassified {
        return error.kind;
    }

    if let Some(status) = error.status_code {
        match status {
            429 | 500..=599 => return ExecutionErrorKind::Transient,
            400..=499 => return ExecutionErrorKind::Permanent,
            _ => {}
        }
    }

    if let Some(category) = &error.category {
        let category = category.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if TRANSIENT_CATEGORIES.contains(&category.as_str()) {
            return ExecutionErrorKind::Transient;
        }
        if PERMANENT_CATEGORIES.contains(&category.as_str()) {
            return ExecutionErrorKind::Permanent;
        }
    }

    if TRANSIENT_MESSAGE.is_match(&error.message) {
        return ExecutionErrorKind::Transient;
    }
    if PERMANENT_MESSAGE.is_match(&error.message) {
        return ExecutionErrorKind::Permanent;
    }

    ExecutionErrorKind::Unclassified
}
