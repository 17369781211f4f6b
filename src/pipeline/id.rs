//! Identity types for the execution plan.
//!
//! IDs are newtypes over `u32` that index directly into the plan's storage
//! vectors.

use std::fmt;

/// Index into `ExecutionPlan::steps` (declaration order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StepId(pub u32);

impl StepId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepId({})", self.0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One copy of one step.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CopyId {
    pub step: StepId,
    pub copy: u32,
}

impl CopyId {
    pub fn new(step: StepId, copy: usize) -> Self {
        Self {
            step,
            copy: copy as u32,
        }
    }
}

impl fmt::Debug for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CopyId(step={}, copy={})", self.step.0, self.copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_id_index() {
        assert_eq!(StepId(3).index(), 3);
        assert_eq!(format!("{:?}", StepId(3)), "StepId(3)");
    }

    #[test]
    fn test_copy_id_ordering() {
        let a = CopyId::new(StepId(0), 1);
        let b = CopyId::new(StepId(1), 0);
        assert!(a < b);
        assert_eq!(format!("{:?}", a), "CopyId(step=0, copy=1)");
    }
}
