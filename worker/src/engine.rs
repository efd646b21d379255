//! Stand-in inference engine.
//!
//! Generates a bounded stream of filler tokens so the surrounding plumbing
//! (request correlation, busy guard, timeouts) can be exercised without a
//! real model runtime behind it.

use llamagrid_cluster::{InferenceRequest, InferenceResponse};
use rand::Rng;
use tokio::time::Duration;

const LEXICON: &[&str] = &[
    "lattice", "gradient", "tensor", "shard", "context", "vector", "window", "token", "layer",
    "weight", "prompt", "sample", "stream", "batch", "cache", "logit", "head", "block", "state",
    "probe",
];

/// Simulated per-token generation cost.
const MILLIS_PER_TOKEN: u64 = 10;
const MAX_LATENCY_MS: u64 = 2_000;

/// Produce a reply for one request. Token count is capped by `max_tokens`.
pub fn run(request: &InferenceRequest) -> InferenceResponse {
    let mut rng = rand::thread_rng();
    let cap = request.max_tokens.clamp(1, 512) as usize;
    let count = rng.gen_range(1..=cap);

    let words: Vec<&str> = (0..count)
        .map(|_| LEXICON[rng.gen_range(0..LEXICON.len())])
        .collect();

    InferenceResponse {
        request_id: request.request_id.clone(),
        text: Some(words.join(" ")),
        finish_reason: Some("length".to_string()),
        error: None,
    }
}

/// How long the simulated generation takes, scaled by the token budget.
pub fn latency(max_tokens: u32) -> Duration {
    Duration::from_millis((max_tokens as u64 * MILLIS_PER_TOKEN).min(MAX_LATENCY_MS))
}
