// Grantmesh Engine — Fan-out with Retry
//
// One agent call = hard timeout + bounded retry with exponential backoff
// (1 s, 2 s, … between attempts). ERROR envelopes and transport failures
// are treated uniformly: retried, then surfaced as an `AgentFailure`.
//
// The semaphore permit is held for the whole invocation, backoff included,
// which keeps the in-flight bound conservative. Cancellation is
// cooperative: dropping the caller's future abandons the call at its next
// await point.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::Semaphore;

use crate::atoms::error::ErrorCode;
use crate::atoms::types::AgentFailure;
use crate::engine::agent::Agent;
use crate::engine::config::FanoutConfig;
use crate::engine::simp::{Envelope, MessageKind, Payload};

/// Call one agent with timeout and retry. A single failing agent never
/// fails the query — the caller collects the `AgentFailure` and moves on.
pub(crate) async fn invoke_with_retry(
    agent: &Arc<Agent>,
    envelope: &Envelope,
    config: &FanoutConfig,
    inflight: &Semaphore,
) -> Result<Envelope, AgentFailure> {
    let _permit = inflight.acquire().await.map_err(|_| AgentFailure {
        agent_id: agent.id.clone(),
        message: "fan-out semaphore closed".to_string(),
    })?;

    let attempts = config.max_retries.max(1);
    let deadline = Duration::from_secs(config.timeout_seconds);
    let mut last_failure = String::new();

    for attempt in 0..attempts {
        match tokio::time::timeout(deadline, agent.handle(envelope)).await {
            Ok(reply) if reply.kind != MessageKind::Error => return Ok(reply),
            Ok(reply) => {
                last_failure = failure_message(&reply);
                warn!(
                    "[orchestrator] Error from {} (attempt {}/{}): {}",
                    agent.id,
                    attempt + 1,
                    attempts,
                    last_failure
                );
            }
            Err(_) => {
                last_failure = format!(
                    "{}: no answer within {}s",
                    ErrorCode::Timeout,
                    config.timeout_seconds
                );
                warn!(
                    "[orchestrator] Timeout from {} (attempt {}/{}), deadline {}s",
                    agent.id,
                    attempt + 1,
                    attempts,
                    config.timeout_seconds
                );
            }
        }

        if attempt + 1 < attempts {
            let backoff = config.backoff_base_seconds * (1u64 << attempt);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }

    warn!("[orchestrator] {} failed after {} attempts", agent.id, attempts);
    Err(AgentFailure { agent_id: agent.id.clone(), message: last_failure })
}

/// Human-readable failure line from an ERROR envelope.
fn failure_message(reply: &Envelope) -> String {
    match &reply.context {
        Payload::Failure { message, code, .. } => format!("{}: {}", code, message),
        _ => "agent returned an error envelope".to_string(),
    }
}
