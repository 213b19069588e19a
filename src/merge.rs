//! Deciding whether two states can be merged, and merging them.
//!
//! A merge attempt goes through
//! `candidate pair -> constraints merged -> gate evaluated -> merged | both retained`.
//! `Merger::try_merge` runs the whole sequence; the steps are also available
//! separately as `merge_constraints`, `is_merge_possible` and `merge`.

use std::fmt;
use std::rc::Rc;

use crate::compare::{compare_memory, compare_sockets, compare_syscalls};
use crate::constraints::ConstraintSet;
use crate::cpu::{Register, RegisterFile};
use crate::exec_state::ExecutionState;
use crate::expr::expr_helpers::{expr_or, ite, ite_bv};
use crate::expr::{Expr, Sort};
use crate::solver::Solver;
use crate::Error;

/// Reason the merge gate rejected a pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Inequivalence {
    SocketOperations,
    SymbolicFiles,
    SyscallTraceLengths,
    SyscallTraces,
    Memory,
}

impl Inequivalence {
    pub fn reason(self) -> &'static str {
        match self {
            Inequivalence::SocketOperations => "inequivalent socket operations",
            Inequivalence::SymbolicFiles => "inequivalent symbolic files",
            Inequivalence::SyscallTraceLengths => "inequivalent syscall trace lengths",
            Inequivalence::SyscallTraces => "inequivalent syscall traces",
            Inequivalence::Memory => "inequivalent memory",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Inequivalence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeCheck {
    Possible,
    Impossible(Inequivalence),
}

impl MergeCheck {
    pub fn is_possible(self) -> bool {
        self == MergeCheck::Possible
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            MergeCheck::Possible => None,
            MergeCheck::Impossible(x) => Some(x.reason()),
        }
    }
}

/// Result of `merge_constraints`.
#[derive(Clone, Debug)]
pub struct MergedConstraints {
    /// Conjunction of the first path condition. Selects the first state's values.
    pub path_a: Rc<Expr>,
    /// Conjunction of the second path condition.
    pub path_b: Rc<Expr>,
    /// Contains only `path_a | path_b`.
    pub constraints: ConstraintSet,
}

pub fn merge_constraints(
    a: &ConstraintSet,
    b: &ConstraintSet,
) -> Result<MergedConstraints, Error> {
    let path_a = a.conjunction()?;
    let path_b = b.conjunction()?;
    let constraints = ConstraintSet::from_expr(expr_or(path_a.clone(), path_b.clone())?)?;
    Ok(MergedConstraints {
        path_a,
        path_b,
        constraints,
    })
}

/// Checks that the states have equivalent I/O history and memory under `constraints`.
///
/// Checks run from cheap to expensive and stop at the first difference: sockets,
/// symbolic files, syscall trace, memory. Registers are not compared, they get merged.
///
/// Symbolic files are compared structurally, so any difference in the expressions
/// describing them rejects the merge.
pub fn is_merge_possible<S: Solver + ?Sized>(
    solver: &S,
    a: &ExecutionState,
    b: &ExecutionState,
    constraints: &ConstraintSet,
) -> Result<MergeCheck, Error> {
    let check = gate(solver, a, b, constraints)?;
    match check {
        MergeCheck::Possible => debug!("Merge possible under {}", constraints),
        MergeCheck::Impossible(reason) => debug!("Merge not possible: {}", reason),
    }
    Ok(check)
}

fn gate<S: Solver + ?Sized>(
    solver: &S,
    a: &ExecutionState,
    b: &ExecutionState,
    constraints: &ConstraintSet,
) -> Result<MergeCheck, Error> {
    use self::Inequivalence::*;
    let platform_a = &a.platform;
    let platform_b = &b.platform;

    if !compare_sockets(solver, constraints, platform_a.input(), platform_b.input())? ||
        !compare_sockets(solver, constraints, platform_a.output(), platform_b.output())?
    {
        return Ok(MergeCheck::Impossible(SocketOperations));
    }

    if platform_a.symbolic_files != platform_b.symbolic_files {
        return Ok(MergeCheck::Impossible(SymbolicFiles));
    }

    if platform_a.syscall_trace.len() != platform_b.syscall_trace.len() {
        return Ok(MergeCheck::Impossible(SyscallTraceLengths));
    }
    for (call_a, call_b) in platform_a.syscall_trace.iter().zip(&platform_b.syscall_trace) {
        if !compare_syscalls(solver, constraints, call_a, call_b)? {
            return Ok(MergeCheck::Impossible(SyscallTraces));
        }
    }

    if !compare_memory(solver, constraints, &a.mem, &b.mem)? {
        return Ok(MergeCheck::Impossible(Memory));
    }
    Ok(MergeCheck::Possible)
}

/// Registers that need an `ite`, along with the value to write.
fn select_registers(
    a: &RegisterFile,
    b: &RegisterFile,
    selector: &Rc<Expr>,
) -> Result<Vec<(Register, Rc<Expr>)>, Error> {
    if !selector.sort().is_bool() {
        return Err(Error::NotBoolean(selector.sort()));
    }
    if !a.same_layout(b) {
        return Err(Error::RegisterLayoutMismatch);
    }
    let mut result = Vec::new();
    for reg in a.canonical_registers() {
        let val_a = a.read(reg)?;
        let val_b = b.read(reg)?;
        // Unreachable through sort-checked writes on equal layouts
        if val_a.sort() != val_b.sort() {
            return Err(Error::SortMismatch(val_a.sort(), val_b.sort()));
        }
        if !val_a.is_symbolic() && !val_b.is_symbolic() && val_a == val_b {
            continue;
        }
        let merged = match a.layout().sort(reg)? {
            Sort::Bool => ite(selector.clone(), val_a, val_b)?,
            Sort::BitVec(width) => ite_bv(width, selector.clone(), val_a, val_b)?,
        };
        result.push((reg, merged));
    }
    Ok(result)
}

/// Writes `ite(selector, a[reg], b[reg])` to `dest` for every register where `a` and
/// `b` are symbolic or have different values. Other registers of `dest` are untouched.
///
/// Nothing is written if any register fails to merge.
pub fn merge_cpu(
    a: &RegisterFile,
    b: &RegisterFile,
    dest: &mut RegisterFile,
    selector: &Rc<Expr>,
) -> Result<(), Error> {
    if !a.same_layout(dest) {
        return Err(Error::RegisterLayoutMismatch);
    }
    for (reg, value) in select_registers(a, b, selector)? {
        dest.write(reg, value)?;
    }
    Ok(())
}

/// Merges `b` into `a`, and returns the merged state.
///
/// Only registers are blended; memory and platform are kept from `a`, which is
/// correct only if `is_merge_possible` accepted the pair. `selector` should be the
/// path condition of `a` and `constraints` the merged path condition, see
/// `merge_constraints`.
pub fn merge(
    a: ExecutionState,
    b: ExecutionState,
    selector: &Rc<Expr>,
    constraints: ConstraintSet,
) -> Result<ExecutionState, Error> {
    let mut merged = a;
    let writes = select_registers(&merged.cpu, &b.cpu, selector)?;
    debug!("Merging states, {} registers differ", writes.len());
    for (reg, value) in writes {
        merged.cpu.write(reg, value)?;
    }
    merged.constraints = constraints;
    Ok(merged)
}

#[derive(Debug)]
pub enum MergeOutcome {
    Merged(ExecutionState),
    /// The gate rejected the pair; both states are returned unmodified.
    BothRetained {
        a: ExecutionState,
        b: ExecutionState,
        reason: Inequivalence,
    },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        match *self {
            MergeOutcome::Merged(_) => true,
            MergeOutcome::BothRetained { .. } => false,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeStats {
    pub attempts: u64,
    pub merged: u64,
    rejected: [u64; 5],
}

impl MergeStats {
    pub fn rejections(&self, reason: Inequivalence) -> u64 {
        self.rejected[reason.index()]
    }

    pub fn total_rejections(&self) -> u64 {
        self.rejected.iter().sum()
    }
}

/// Runs merge attempts with a solver and keeps count of the results.
pub struct Merger<S: Solver> {
    solver: S,
    stats: MergeStats,
}

impl<S: Solver> Merger<S> {
    pub fn new(solver: S) -> Merger<S> {
        Merger {
            solver,
            stats: MergeStats::default(),
        }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Tries to merge two candidate states.
    ///
    /// An `Err` means the states were inconsistent (e.g. registers of different
    /// width); the pair is consumed in that case.
    pub fn try_merge(
        &mut self,
        a: ExecutionState,
        b: ExecutionState,
    ) -> Result<MergeOutcome, Error> {
        self.stats.attempts += 1;
        let merged = merge_constraints(&a.constraints, &b.constraints)?;
        match is_merge_possible(&self.solver, &a, &b, &merged.constraints)? {
            MergeCheck::Impossible(reason) => {
                self.stats.rejected[reason.index()] += 1;
                Ok(MergeOutcome::BothRetained {
                    a,
                    b,
                    reason,
                })
            }
            MergeCheck::Possible => {
                let state = merge(a, b, &merged.path_a, merged.constraints)?;
                self.stats.merged += 1;
                Ok(MergeOutcome::Merged(state))
            }
        }
    }
}
