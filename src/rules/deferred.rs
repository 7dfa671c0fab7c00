use serde::de::DeserializeOwned;

use crate::error::{PostprocessError, Result};
use crate::pipeline::RuleScope;
use crate::reinfer::{CompletedGroup, ReinferContinuation, ReinferCorrelator, Submission};

/// Lazily configured correlator for rules that defer on re-inference.
pub(super) struct Deferred<C, F> {
    correlator: Option<ReinferCorrelator<C, F>>,
}

impl<C, F> Default for Deferred<C, F> {
    fn default() -> Self {
        Self { correlator: None }
    }
}

impl<C, F> Deferred<C, F> {
    fn correlator(&mut self, scope: &RuleScope<'_>) -> &mut ReinferCorrelator<C, F> {
        self.correlator.get_or_insert_with(|| {
            let timeout = scope.reinfer_timeout();
            tracing::info!(
                source_id = %scope.source_id(),
                alg_name = %scope.alg_name(),
                timeout,
                "re-inference timeout derived"
            );
            ReinferCorrelator::new(timeout)
        })
    }

    /// Drop groups that outlived the timeout at this frame's time.
    pub(super) fn sweep(&mut self, scope: &RuleScope<'_>) {
        let now = scope.time();
        self.correlator(scope).sweep(now);
    }

    pub(super) fn open(&mut self, scope: &RuleScope<'_>, expected: usize, context: C) -> Result<()> {
        let key = scope.frame().correlation_key();
        self.correlator(scope).open(key, expected, context)
    }

    /// File one fragment; the whole group once it is complete.
    pub(super) fn collect(
        &mut self,
        scope: &RuleScope<'_>,
        fragment: F,
    ) -> Result<Option<CompletedGroup<C, F>>> {
        let key = scope.frame().correlation_key();
        let correlator = self.correlator(scope);
        match correlator.submit_part(key, fragment) {
            Submission::Unknown => Err(PostprocessError::CorrelationExpired { key: key.0 }),
            Submission::Pending { .. } => Ok(None),
            Submission::Complete => Ok(correlator.pop(key)),
        }
    }
}

/// Read `field` of the echoed correlation context.
pub(super) fn context_field<T: DeserializeOwned>(
    continuation: &ReinferContinuation,
    field: &str,
) -> Result<T> {
    let value = continuation.context.get(field).cloned().unwrap_or_default();
    serde_json::from_value(value)
        .map_err(|e| PostprocessError::InvalidGeometry(format!("correlation context {field}: {e}")))
}
