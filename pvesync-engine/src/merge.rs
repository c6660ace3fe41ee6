//! Per-attribute merge decisions.

use crate::attr::Attr;

/// What to do with one attribute in a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    /// Not owned; leave the remote value untouched.
    Leave,
    /// Owned and already in the desired state.
    NoOp,
    Set(T),
    Clear,
}

/// Decides one attribute against the current remote value.
///
/// Equality wins before anything else, so a declared attribute that already
/// matches never produces a mutation. An `Empty` attribute clears a present
/// remote value and is a no-op against an absent one.
pub fn decide<T: Clone + PartialEq>(desired: &Attr<T>, current: Option<&T>) -> Decision<T> {
    match (desired, current) {
        (Attr::Unset, _) => Decision::Leave,
        (Attr::Empty, None) => Decision::NoOp,
        (Attr::Empty, Some(_)) => Decision::Clear,
        (Attr::Value(v), Some(cur)) if v == cur => Decision::NoOp,
        (Attr::Value(v), _) => Decision::Set(v.clone()),
    }
}

/// Applies the decision for `desired` to one sub-field of a merged device.
/// Returns whether the field changed.
pub fn apply<T: Clone + PartialEq>(desired: &Attr<T>, target: &mut Option<T>) -> bool {
    match decide(desired, target.as_ref()) {
        Decision::Set(v) => {
            *target = Some(v);
            true
        }
        Decision::Clear => {
            *target = None;
            true
        }
        Decision::Leave | Decision::NoOp => false,
    }
}

/// Copies only declared values into a fresh field, for devices being created.
pub fn initial<T: Clone>(desired: &Attr<T>) -> Option<T> {
    desired.value().cloned()
}
