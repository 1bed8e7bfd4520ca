//! Call sites and their resolution state.

use std::fmt;

use crate::ir::{FunctionId, InstId};

/// How a call site's target resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// The callee is a defined function in the module.
    Resolved(FunctionId),
    /// The callee is external to the module (declared `EXTERNAL`, named
    /// only, or declared but never defined). Its body is invisible to the
    /// analyses.
    External,
    /// The call goes through a function value; no static target exists.
    Indirect,
}

/// A call instruction within a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// The call instruction.
    pub inst: InstId,
    /// The resolution of the call target.
    pub target: CallTarget,
}

impl CallSite {
    /// Creates a new call site.
    #[must_use]
    pub const fn new(inst: InstId, target: CallTarget) -> Self {
        Self { inst, target }
    }

    /// Returns `true` if the target is a defined function in the module.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self.target, CallTarget::Resolved(_))
    }

    /// Returns the resolved callee, if any.
    #[must_use]
    pub const fn resolved(&self) -> Option<FunctionId> {
        match self.target {
            CallTarget::Resolved(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            CallTarget::Resolved(callee) => write!(f, "{} -> {callee}", self.inst),
            CallTarget::External => write!(f, "{} -> <external>", self.inst),
            CallTarget::Indirect => write!(f, "{} -> <indirect>", self.inst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_resolution() {
        let resolved = CallSite::new(InstId::new(0), CallTarget::Resolved(FunctionId::new(3)));
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolved(), Some(FunctionId::new(3)));

        let external = CallSite::new(InstId::new(1), CallTarget::External);
        assert!(!external.is_resolved());
        assert_eq!(external.resolved(), None);

        let indirect = CallSite::new(InstId::new(2), CallTarget::Indirect);
        assert_eq!(indirect.resolved(), None);
    }

    #[test]
    fn test_call_site_display() {
        let site = CallSite::new(InstId::new(4), CallTarget::Resolved(FunctionId::new(1)));
        assert_eq!(site.to_string(), "i4 -> f1");
        let site = CallSite::new(InstId::new(5), CallTarget::Indirect);
        assert_eq!(site.to_string(), "i5 -> <indirect>");
    }
}
