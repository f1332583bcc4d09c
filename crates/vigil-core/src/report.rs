use tracing::error;

use vigil_types::error::VigilError;

/// Collaborator that records non-fatal errors the daemon swallows,
/// so they still reach an operator.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str, detail: &str, error: Option<&VigilError>);
}

/// Reporter that forwards to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, message: &str, detail: &str, err: Option<&VigilError>) {
        match err {
            Some(e) => error!(detail = %detail, "{message}: {e}"),
            None => error!(detail = %detail, "{message}"),
        }
    }
}
