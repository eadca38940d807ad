use tracing::trace;

/// Suppresses re-sending a value equal to the last one sent.
///
/// Equality is structural, so a state rebuilt from fresh data with the same
/// content is still suppressed. [`new`] compares with `PartialEq`; JSON-backed
/// states should use [`with_equality`] with a comparison that treats `1` and
/// `1.0` alike, since `serde_json::Value` keeps them apart. After
/// [`invalidate`] the next check passes once regardless of equality; this is
/// used after a new port was transferred and the receiver's copy is gone.
///
/// [`new`]: StateReconciler::new
/// [`with_equality`]: StateReconciler::with_equality
/// [`invalidate`]: StateReconciler::invalidate
#[derive(Debug, Clone)]
pub struct StateReconciler<T> {
    last_sent: Option<T>,
    bypass_once: bool,
    same: fn(&T, &T) -> bool,
}

impl<T: PartialEq> Default for StateReconciler<T> {
    fn default() -> Self {
        Self::with_equality(|a, b| a == b)
    }
}

impl<T: PartialEq> StateReconciler<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> StateReconciler<T> {
    pub fn with_equality(same: fn(&T, &T) -> bool) -> Self {
        Self {
            last_sent: None,
            bypass_once: false,
            same,
        }
    }

    pub fn should_send(&self, next: &T) -> bool {
        if self.bypass_once {
            return true;
        }
        match &self.last_sent {
            Some(last) if (self.same)(last, next) => {
                trace!(target: "frame.host.reconciler", "state unchanged; suppressed");
                false
            }
            _ => true,
        }
    }

    /// Records `sent` as delivered and consumes a pending bypass.
    pub fn record(&mut self, sent: T) {
        self.last_sent = Some(sent);
        self.bypass_once = false;
    }

    /// Lets the next check through once, keeping the snapshot.
    pub fn invalidate(&mut self) {
        self.bypass_once = true;
    }

    /// Forgets everything; used when the iframe gets a new url.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.bypass_once = false;
    }

    pub fn last(&self) -> Option<&T> {
        self.last_sent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_are_suppressed_regardless_of_identity() {
        let mut reconciler = StateReconciler::new();
        let first = json!({"a": 1, "nested": {"b": [1, 2]}});
        assert!(reconciler.should_send(&first));
        reconciler.record(first);

        let rebuilt = json!({"nested": {"b": [1, 2]}, "a": 1});
        assert!(!reconciler.should_send(&rebuilt));
        assert!(reconciler.should_send(&json!({"a": 2, "nested": {"b": [1, 2]}})));
    }

    #[test]
    fn invalidate_bypasses_exactly_once() {
        let mut reconciler = StateReconciler::new();
        reconciler.record(json!({"a": 1}));
        reconciler.invalidate();

        assert!(reconciler.should_send(&json!({"a": 1})));
        assert!(reconciler.should_send(&json!({"a": 1})), "check alone does not consume");
        reconciler.record(json!({"a": 1}));
        assert!(!reconciler.should_send(&json!({"a": 1})));
        assert_eq!(reconciler.last(), Some(&json!({"a": 1})));
    }

    #[test]
    fn custom_equality_decides_suppression() {
        let mut reconciler: StateReconciler<f64> =
            StateReconciler::with_equality(|a, b| (a - b).abs() < 0.5);
        reconciler.record(1.0);
        assert!(!reconciler.should_send(&1.2));
        assert!(reconciler.should_send(&2.0));
    }

    #[test]
    fn reset_clears_snapshot_and_bypass() {
        let mut reconciler = StateReconciler::new();
        reconciler.record(json!("x"));
        reconciler.invalidate();
        reconciler.reset();
        assert_eq!(reconciler.last(), None);
        assert!(reconciler.should_send(&json!("x")));
    }
}
