use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintSet;
use crate::cpu::{RegisterFile, RegisterLayout};
use crate::expr::expr_helpers::expr_not;
use crate::expr::Expr;
use crate::memory::Memory;
use crate::platform::Platform;
use crate::Error;

/// Machine snapshot of one explored path.
///
/// Forking is cloning; expressions are shared between the clones.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExecutionState {
    pub cpu: RegisterFile,
    pub mem: Memory,
    pub platform: Platform,
    pub constraints: ConstraintSet,
}

impl ExecutionState {
    pub fn new(cpu: RegisterFile, mem: Memory, platform: Platform) -> ExecutionState {
        ExecutionState {
            cpu,
            mem,
            platform,
            constraints: ConstraintSet::new(),
        }
    }

    /// Zeroed registers, empty symbolic memory and a platform with input/output sockets.
    pub fn with_layout(layout: Rc<RegisterLayout>) -> ExecutionState {
        ExecutionState::new(RegisterFile::new(layout), Memory::new_symbolic(), Platform::with_io())
    }

    /// Adds an additional assumption to the path condition.
    pub fn constrain(&mut self, constraint: Rc<Expr>) -> Result<(), Error> {
        self.constraints.add(constraint)
    }

    /// Returns states with `condition` assumed to be true and false, respectively.
    pub fn fork(&self, condition: &Rc<Expr>) -> Result<(ExecutionState, ExecutionState), Error> {
        let mut taken = self.clone();
        taken.constrain(condition.clone())?;
        let mut not_taken = self.clone();
        not_taken.constrain(expr_not(condition.clone()))?;
        Ok((taken, not_taken))
    }
}

#[test]
fn fork_adds_opposite_constraints() {
    use crate::expr::expr_helpers::*;
    use crate::expr::Sort;
    let state = ExecutionState::with_layout(Rc::new(RegisterLayout::x86_64()));
    let cond = expr_eq(byte_var("x"), byte(1)).unwrap();
    let (a, b) = state.fork(&cond).unwrap();
    assert_eq!(a.constraints.as_slice(), &[cond.clone()][..]);
    assert_eq!(b.constraints.as_slice(), &[expr_not(cond)][..]);
    assert!(state.constraints.is_empty());
    assert_eq!(state.fork(&byte_var("x")).unwrap_err(), Error::NotBoolean(Sort::BitVec(8)));
}
