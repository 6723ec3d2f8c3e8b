//! Error-reporting sink.
//!
//! Failures that are swallowed on purpose (a cache write that did not land, a
//! rotation tick that will be retried, an identity link that failed after the
//! account was created) must still reach an error tracker. Stores receive an
//! [`ErrorReporter`] at construction and call [`ErrorReporter::report`] for
//! each such failure before carrying on.
//!
//! [`TracingReporter`] is the default sink. It emits an `error` event through
//! [`tracing`], so whatever subscriber the service installs decides where the
//! report ends up.

use std::{error::Error, sync::Arc};

/// Opaque capability that records an error for later inspection.
///
/// Implementations must not block and must not fail.
pub trait ErrorReporter: Send + Sync {
    /// Records `err`.
    fn report(&self, err: &(dyn Error + 'static));
}

/// Reports errors as `tracing` events at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &(dyn Error + 'static)) {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        tracing::error!(error = %err, causes = ?chain, "reported error");
    }
}

/// Returns the default shared reporter.
#[must_use]
pub fn default_reporter() -> Arc<dyn ErrorReporter> {
    Arc::new(TracingReporter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::StorageError;

    #[test]
    fn test_tracing_reporter_accepts_chained_errors() {
        let inner = std::io::Error::other("socket closed");
        let err = StorageError::connection_with_source("cache write failed", inner);

        // No subscriber installed; reporting must still be a silent no-op.
        TracingReporter.report(&err);
        default_reporter().report(&err);
    }
}
