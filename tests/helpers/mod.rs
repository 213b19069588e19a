#![allow(dead_code)]

use std::rc::Rc;

use symmerge::expr_helpers::*;
use symmerge::{
    ConstraintSet, Expr, ExecutionState, MemoryMap, Permissions, RegisterLayout, Sort,
};

pub const DATA: u64 = 0x0060_0000;
pub const STACK: u64 = 0x7fff_0000;

pub fn layout() -> Rc<RegisterLayout> {
    Rc::new(RegisterLayout::x86_64())
}

/// State with a data and a stack map, some concrete contents, and empty I/O.
pub fn base_state() -> ExecutionState {
    let mut state = ExecutionState::with_layout(layout());
    let rw = Permissions::READ | Permissions::WRITE;
    state.mem.map(MemoryMap::zeroed("data", rw, DATA, 0x1000)).unwrap();
    state.mem.map(MemoryMap::zeroed("stack", rw, STACK, 0x1000)).unwrap();
    state.mem.write_u64(DATA + 0x10, 0x1122_3344_5566_7788).unwrap();
    state.mem.write_u64(STACK + 0xff8, 0x0040_1000).unwrap();
    state
}

/// The branch condition used to fork candidate pairs: `x == 1` on a symbolic byte.
pub fn branch_condition() -> Rc<Expr> {
    expr_eq(byte_var("x"), byte(1)).unwrap()
}

/// Two states forked from `base_state` on `branch_condition`.
pub fn forked_pair() -> (ExecutionState, ExecutionState) {
    base_state().fork(&branch_condition()).unwrap()
}

pub fn write_output(state: &mut ExecutionState, data: &[Rc<Expr>]) {
    let out = state.platform.output_id().unwrap();
    state.platform.sockets_mut().transmit(out, data).unwrap();
}

pub fn set_reg(state: &mut ExecutionState, name: &str, value: Rc<Expr>) {
    let reg = state.cpu.layout().by_name(name).unwrap();
    state.cpu.write(reg, value).unwrap();
}

pub fn reg(state: &ExecutionState, name: &str) -> Rc<Expr> {
    state.cpu.read_by_name(name).unwrap()
}

pub fn with_constraint(cs: &ConstraintSet, constraint: Rc<Expr>) -> ConstraintSet {
    cs.with(constraint).unwrap()
}

pub fn qword(value: u64) -> Rc<Expr> {
    constval(value, 64)
}

pub fn bool_var(name: &str) -> Rc<Expr> {
    var(name, Sort::Bool)
}
