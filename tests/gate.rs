mod helpers;

use std::cell::Cell;
use std::rc::Rc;

use symmerge::expr_helpers::*;
use symmerge::{
    is_merge_possible, merge_constraints, ConstraintSet, EnumeratingSolver, Expr,
    Inequivalence, MergeCheck, SymbolicFile,
};

use helpers::*;

fn check(
    a: &symmerge::ExecutionState,
    b: &symmerge::ExecutionState,
) -> MergeCheck {
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    is_merge_possible(&EnumeratingSolver::new(), a, b, &merged.constraints).unwrap()
}

#[test]
fn identical_io_and_memory() {
    let (a, b) = forked_pair();
    let result = check(&a, &b);
    assert_eq!(result, MergeCheck::Possible);
    assert!(result.is_possible());
    assert_eq!(result.reason(), None);
}

#[test]
fn different_output_bytes() {
    let (mut a, mut b) = forked_pair();
    write_output(&mut a, &bytes(b"AB"));
    write_output(&mut b, &bytes(b"AC"));
    let result = check(&a, &b);
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::SocketOperations));
    assert_eq!(result.reason(), Some("inequivalent socket operations"));
}

#[test]
fn output_on_one_side_only() {
    let (mut a, b) = forked_pair();
    write_output(&mut a, &bytes(b"A"));
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SocketOperations));
    let (mut a, b) = forked_pair();
    a.platform.set_input(None).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SocketOperations));
}

#[test]
fn output_depending_on_branch_variable() {
    // Both sides write x, which is the same byte on both paths
    let (mut a, mut b) = forked_pair();
    write_output(&mut a, &[byte_var("x")]);
    write_output(&mut b, &[byte_var("x")]);
    assert_eq!(check(&a, &b), MergeCheck::Possible);
    // One side writes the value x has on its path, which is not x on the other path
    let (mut a, mut b) = forked_pair();
    write_output(&mut a, &[byte(1)]);
    write_output(&mut b, &[byte_var("x")]);
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SocketOperations));
}

#[test]
fn connected_input_sockets() {
    let (mut a, mut b) = forked_pair();
    for state in [&mut a, &mut b].iter_mut() {
        let sockets = state.platform.sockets_mut();
        let (ours, theirs) = sockets.pair();
        sockets.transmit(ours, &bytes(b"GET")).unwrap();
        sockets.transmit(theirs, &bytes(b"200")).unwrap();
        state.platform.set_input(Some(ours)).unwrap();
    }
    assert_eq!(check(&a, &b), MergeCheck::Possible);
    let peer = b.platform.input().and_then(|x| x.peer()).map(|x| x.id()).unwrap();
    b.platform.sockets_mut().get_mut(peer).unwrap().buffer = bytes(b"404");
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SocketOperations));
}

#[test]
fn symbolic_files_compared_structurally() {
    let (mut a, mut b) = forked_pair();
    let file = SymbolicFile {
        data: vec![byte_var("f0"), byte_var("f1")],
        offset: 0,
    };
    a.platform.add_symbolic_file("/tmp/input", file.clone()).unwrap();
    b.platform.add_symbolic_file("/tmp/input", file.clone()).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Possible);

    // Equivalent but not identical content is still rejected
    let mut other = file.clone();
    other.data[0] = expr_xor(byte_var("f0"), byte(0)).unwrap();
    b.platform.add_symbolic_file("/tmp/input", other).unwrap();
    let result = check(&a, &b);
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::SymbolicFiles));
    assert_eq!(result.reason(), Some("inequivalent symbolic files"));

    let (mut a, b) = forked_pair();
    a.platform.add_symbolic_file("/tmp/input", file).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SymbolicFiles));
}

#[test]
fn syscall_traces() {
    let (mut a, mut b) = forked_pair();
    a.platform.record_syscall("write", 1, bytes(b"hello")).unwrap();
    b.platform.record_syscall("write", 1, bytes(b"hello")).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Possible);

    let mut c = b.clone();
    c.platform.record_syscall("close", 1, Vec::new()).unwrap();
    let result = check(&a, &c);
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::SyscallTraceLengths));
    assert_eq!(result.reason(), Some("inequivalent syscall trace lengths"));

    let mut d = b.clone();
    d.platform.syscall_trace[0].fd = 2;
    let result = check(&a, &d);
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::SyscallTraces));
    assert_eq!(result.reason(), Some("inequivalent syscall traces"));

    let mut e = b.clone();
    e.platform.syscall_trace[0].name = "send".into();
    assert_eq!(check(&a, &e), MergeCheck::Impossible(Inequivalence::SyscallTraces));

    let mut f = b;
    f.platform.syscall_trace[0].data = bytes(b"hellO");
    assert_eq!(check(&a, &f), MergeCheck::Impossible(Inequivalence::SyscallTraces));
}

#[test]
fn syscall_order_matters() {
    let (mut a, mut b) = forked_pair();
    a.platform.record_syscall("read", 0, Vec::new()).unwrap();
    a.platform.record_syscall("write", 1, Vec::new()).unwrap();
    b.platform.record_syscall("write", 1, Vec::new()).unwrap();
    b.platform.record_syscall("read", 0, Vec::new()).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::SyscallTraces));
}

#[test]
fn single_concrete_byte_differs() {
    let (a, mut b) = forked_pair();
    b.mem.write_bytes(STACK + 0x20, &[1]).unwrap();
    let result = check(&a, &b);
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::Memory));
    assert_eq!(result.reason(), Some("inequivalent memory"));
}

#[test]
fn symbolic_memory_bytes() {
    let (mut a, mut b) = forked_pair();
    a.mem.write(DATA + 4, &[byte_var("y")]).unwrap();
    b.mem.write(DATA + 4, &[expr_xor(byte_var("y"), byte(0)).unwrap()]).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Possible);

    // On the merged path condition x is not fixed
    let (mut a, mut b) = forked_pair();
    a.mem.write(DATA + 4, &[byte_var("x")]).unwrap();
    b.mem.write_bytes(DATA + 4, &[1]).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::Memory));

    // Symbolic on one side only, equal to the concrete byte of the other under both paths
    let (mut a, b) = forked_pair();
    let zero_either_way = expr_and(byte_var("x"), byte(0)).unwrap();
    a.mem.write(DATA + 4, &[zero_either_way]).unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Possible);
}

#[test]
fn extra_map() {
    let (a, mut b) = forked_pair();
    b.mem.map(symmerge::MemoryMap::zeroed("heap", symmerge::Permissions::READ, 0x1000, 0x10))
        .unwrap();
    assert_eq!(check(&a, &b), MergeCheck::Impossible(Inequivalence::Memory));
}

#[test]
fn symbolic_register_only() {
    let (mut a, mut b) = forked_pair();
    set_reg(&mut a, "rdi", var("arg_a", symmerge::Sort::BitVec(64)));
    set_reg(&mut b, "rdi", var("arg_b", symmerge::Sort::BitVec(64)));
    assert_eq!(check(&a, &b), MergeCheck::Possible);
}

#[test]
fn cheap_checks_run_first() {
    let calls = Cell::new(0u32);
    let counting = |_: &ConstraintSet, _: &Rc<Expr>| {
        calls.set(calls.get() + 1);
        true
    };
    let (mut a, mut b) = forked_pair();
    a.mem.write(DATA, &[byte_var("m")]).unwrap();
    b.mem.write(DATA, &[byte_var("m")]).unwrap();
    a.platform.record_syscall("exit", 0, Vec::new()).unwrap();
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    let result = is_merge_possible(&counting, &a, &b, &merged.constraints).unwrap();
    assert_eq!(result, MergeCheck::Impossible(Inequivalence::SyscallTraceLengths));
    // Memory was never looked at
    assert_eq!(calls.get(), 0);

    b.platform.record_syscall("exit", 0, Vec::new()).unwrap();
    let result = is_merge_possible(&counting, &a, &b, &merged.constraints).unwrap();
    assert_eq!(result, MergeCheck::Possible);
    assert_eq!(calls.get(), 1);
}

#[test]
fn gate_is_stateless() {
    let (mut a, b) = forked_pair();
    write_output(&mut a, &bytes(b"A"));
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    let solver = EnumeratingSolver::new();
    let first = is_merge_possible(&solver, &a, &b, &merged.constraints).unwrap();
    let second = is_merge_possible(&solver, &a, &b, &merged.constraints).unwrap();
    assert_eq!(first, second);
    let mut b = b;
    write_output(&mut b, &bytes(b"A"));
    assert!(is_merge_possible(&solver, &a, &b, &merged.constraints).unwrap().is_possible());
}
