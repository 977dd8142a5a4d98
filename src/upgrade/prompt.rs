//! Waiting for the operator's answer at a confirmation gate.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::host::{Decision, Operator, Session};

/// Wait for the next decision of `session` within `timeout`.
///
/// Events from other actors or messages and events that carry no decision
/// are ignored without extending the deadline. `None` means the operator
/// timed out or the interaction stream ended.
pub async fn next_decision(
    operator: &impl Operator,
    session: &Session,
    timeout: Duration,
) -> Option<Decision> {
    let deadline = Instant::now() + timeout;
    loop {
        let Ok(event) = tokio::time::timeout_at(deadline, operator.next_interaction()).await else {
            debug!("Confirmation timed out after {}s", timeout.as_secs_f64());
            return None;
        };
        let event = event?;
        if !event.belongs_to(session) {
            debug!(actor = event.actor_id, message = event.message_id, "Ignoring foreign interaction");
            continue;
        }
        if let Some(decision) = event.decision() {
            return Some(decision);
        }
        debug!(action = %event.action_id, "Ignoring interaction without a decision");
    }
}

/// Wait for accept or reject, ignoring selection changes.
///
/// Returns `true` only when the operator accepted in time.
pub async fn confirm(operator: &impl Operator, session: &Session, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match next_decision(operator, session, remaining).await {
            Some(Decision::Accept) => return true,
            Some(Decision::Reject) | None => return false,
            Some(Decision::Select(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedOperator;

    const SESSION: Session = Session {
        actor_id: 1,
        message_id: 10,
    };

    #[tokio::test]
    async fn test_foreign_events_are_ignored() {
        let operator = ScriptedOperator::new()
            .from_actor(2, 10, "accept")
            .from_actor(1, 11, "accept")
            .reject();
        let decision = next_decision(&operator, &SESSION, Duration::from_millis(200)).await;
        assert_eq!(decision, Some(Decision::Reject));
    }

    #[tokio::test]
    async fn test_timeout_yields_none() {
        let operator = ScriptedOperator::new();
        assert_eq!(next_decision(&operator, &SESSION, Duration::from_millis(20)).await, None);
        assert!(!confirm(&operator, &SESSION, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_confirm_skips_selection() {
        let operator = ScriptedOperator::new().select(1).accept();
        assert!(confirm(&operator, &SESSION, Duration::from_millis(200)).await);
    }
}
