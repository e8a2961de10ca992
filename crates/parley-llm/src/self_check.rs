use parley_core::gateway::ModelGateway;
use tracing::{info, warn};

/// Prompt used to verify credentials and connectivity at startup.
pub const SELF_CHECK_PROMPT: &str = "Say hi in 3 words";

/// Send one single-shot prompt and log the outcome.
///
/// Failure is logged as a warning and never propagated; the server stays up
/// so the rest of the service can be debugged.
pub async fn run_self_check(gateway: &dyn ModelGateway) -> bool {
    match gateway.generate_from_single(SELF_CHECK_PROMPT).await {
        Ok(reply) => {
            info!(
                provider = gateway.name(),
                model = gateway.model(),
                reply = %reply,
                "model self-check passed"
            );
            true
        }
        Err(e) => {
            warn!(
                provider = gateway.name(),
                model = gateway.model(),
                error = %e,
                error_kind = e.kind(),
                "model self-check failed, continuing without it"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedGateway, ScriptedReply};
    use parley_core::errors::FailureCause;

    #[tokio::test]
    async fn passes_on_reply() {
        let gateway = ScriptedGateway::new(vec![ScriptedReply::text("hi there friend")]);
        assert!(run_self_check(&gateway).await);

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0][0].text(), SELF_CHECK_PROMPT);
    }

    #[tokio::test]
    async fn failure_is_reported_not_raised() {
        let gateway = ScriptedGateway::new(vec![ScriptedReply::failure(
            FailureCause::Authentication("API key not valid".into()),
        )]);
        assert!(!run_self_check(&gateway).await);
    }
}
