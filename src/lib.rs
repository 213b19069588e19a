//! Equivalence checking and merging of symbolic execution states.
//!
//! Two states that reached the same point with equivalent I/O history and memory can be
//! replaced by one state whose differing registers are `ite(path_a, a_value, b_value)`
//! selects, guarded by the path condition of the first state.
//! See `merge::Merger` for the driver that ties the pieces together.

#![allow(clippy::style, clippy::bool_comparison, clippy::needless_lifetimes)]

#[macro_use] extern crate log;

pub mod compare;
pub mod constraints;
pub mod cpu;
pub mod exec_state;
pub mod expr;
pub mod memory;
pub mod merge;
pub mod platform;
pub mod solver;

pub use crate::constraints::ConstraintSet;
pub use crate::cpu::{Register, RegisterFile, RegisterLayout};
pub use crate::exec_state::ExecutionState;
pub use crate::expr::{ArithOpType, Expr, ExprType, Sort, expr_helpers};
pub use crate::memory::{Memory, MemoryKind, MemoryMap, Permissions};
pub use crate::merge::{
    Inequivalence, MergeCheck, MergeOutcome, MergeStats, MergedConstraints, Merger,
    is_merge_possible, merge, merge_constraints, merge_cpu,
};
pub use crate::platform::{Platform, Socket, SocketId, SocketRef, Sockets, SymbolicFile, Syscall};
pub use crate::solver::{EnumeratingSolver, Solver};

use quick_error::quick_error;

quick_error! {
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum Error {
        SortMismatch(expected: Sort, found: Sort) {
            display("Sort mismatch: expected {}, found {}", expected, found)
        }
        NotBoolean(found: Sort) {
            display("Expected a boolean expression, found {}", found)
        }
        NotBitVector(found: Sort) {
            display("Expected a bit-vector expression, found {}", found)
        }
        InvalidWidth(width: u8) {
            display("Invalid bit-vector width {}", width)
        }
        ShortRead(address: u64, expected: usize, got: usize) {
            display("Read at {:x} returned {} bytes, expected {}", address, got, expected)
        }
        Unmapped(address: u64) {
            display("Address {:x} is not mapped", address)
        }
        InvalidMap(start: u64, size: u64) {
            display("Map of {:x} bytes at {:x} is empty or ends past the address space", size, start)
        }
        OverlappingMap(start: u64, end: u64) {
            display("Map {:x}..{:x} overlaps an existing map", start, end)
        }
        SymbolicWriteToConcrete(address: u64) {
            display("Symbolic write at {:x} to concrete-only memory", address)
        }
        RegisterLayoutMismatch {
            display("Register files use different layouts")
        }
        UnknownRegister(index: u16) {
            display("Register {} is not part of the layout", index)
        }
        InvalidSocket(id: u32) {
            display("Socket {} does not exist", id)
        }
    }
}
