//! Predicates decide which resources a single watch is allowed to see.
//!
//! A predicate must be pure: the watch engine evaluates it on the current
//! object and, for modifications, again on the prior snapshot to detect
//! objects entering or leaving the filtered view.

mod selector;
pub use selector::*;


#[cfg(test)]
use mockall::automock;

use crate::Result;

#[cfg_attr(test, automock)]
pub trait Predicate<O: Send + Sync + 'static>: Send + Sync {
    /// Returns whether `obj` belongs to this watch's view
    fn matches(
        &self,
        obj: &O,
    ) -> Result<bool>;
}

/// Matches every object
#[derive(Debug, Clone, Copy, Default)]
pub struct Everything;

impl<O: Send + Sync + 'static> Predicate<O> for Everything {
    fn matches(
        &self,
        _obj: &O,
    ) -> Result<bool> {
        Ok(true)
    }
}

impl<O, F> Predicate<O> for F
where
    O: Send + Sync + 'static,
    F: Fn(&O) -> Result<bool> + Send + Sync,
{
    fn matches(
        &self,
        obj: &O,
    ) -> Result<bool> {
        self(obj)
    }
}
