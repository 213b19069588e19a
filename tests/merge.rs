mod helpers;

use symmerge::expr_helpers::*;
use symmerge::{
    is_merge_possible, merge, merge_constraints, merge_cpu, EnumeratingSolver, Error,
    ExecutionState, Inequivalence, MergeCheck, MergeOutcome, Merger, RegisterLayout, Solver,
    Sort,
};

use helpers::*;

#[test]
fn end_to_end() {
    let (mut a, mut b) = forked_pair();
    write_output(&mut a, &bytes(&[0x41, 0x42]));
    write_output(&mut b, &bytes(&[0x41, 0x42]));
    set_reg(&mut a, "rax", qword(5));
    set_reg(&mut b, "rax", qword(7));

    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    let solver = EnumeratingSolver::new();
    let check = is_merge_possible(&solver, &a, &b, &merged.constraints).unwrap();
    assert_eq!(check, MergeCheck::Possible);
    assert_eq!(check.reason(), None);

    let expected_constraint = expr_or(
        a.constraints.conjunction().unwrap(),
        b.constraints.conjunction().unwrap(),
    ).unwrap();
    let expected_rax = ite_bv(64, merged.path_a.clone(), qword(5), qword(7)).unwrap();
    let mem = a.mem.clone();
    let platform = a.platform.clone();

    let state = merge(a, b, &merged.path_a, merged.constraints.clone()).unwrap();
    assert_eq!(reg(&state, "rax"), expected_rax);
    assert_eq!(state.constraints.as_slice(), &[expected_constraint][..]);
    // Equal concrete registers stay as they were
    assert_eq!(reg(&state, "rbx"), qword(0));
    assert_eq!(reg(&state, "zf"), bool_const(false));
    assert_eq!(state.mem, mem);
    assert_eq!(state.platform, platform);
}

#[test]
fn merged_register_follows_selector() {
    let (mut a, mut b) = forked_pair();
    set_reg(&mut a, "rcx", qword(5));
    set_reg(&mut b, "rcx", qword(7));
    set_reg(&mut a, "cf", bool_const(true));
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    let state = merge(a, b, &merged.path_a, merged.constraints.clone()).unwrap();

    let solver = EnumeratingSolver::new();
    let rcx = reg(&state, "rcx");
    let on_a = with_constraint(&state.constraints, merged.path_a.clone());
    let on_b = with_constraint(&state.constraints, expr_not(merged.path_a.clone()));
    assert!(solver.must_be_true(&on_a, &expr_eq(rcx.clone(), qword(5)).unwrap()));
    assert!(solver.must_be_true(&on_b, &expr_eq(rcx.clone(), qword(7)).unwrap()));
    assert!(!solver.must_be_true(&state.constraints, &expr_eq(rcx, qword(5)).unwrap()));

    let cf = reg(&state, "cf");
    assert_eq!(cf.sort(), Sort::Bool);
    assert!(solver.must_be_true(&on_a, &cf));
    assert!(solver.must_be_true(&on_b, &expr_not(cf)));
}

#[test]
fn merged_constraints_keep_satisfiability() {
    let solver = EnumeratingSolver::new();
    let p = bool_var("p");
    let base = base_state();

    let mut a = base.clone();
    a.constrain(branch_condition()).unwrap();
    let mut b = base.clone();
    b.constrain(p.clone()).unwrap();
    b.constrain(expr_not(p)).unwrap();
    // b alone is infeasible, the disjunction is still feasible because of a
    assert!(solver.must_be_true(&b.constraints, &bool_const(false)));
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    assert!(!solver.must_be_true(&merged.constraints, &bool_const(false)));
    // The merged condition is implied by either path condition
    assert!(solver.must_be_true(&a.constraints, &merged.constraints.as_slice()[0]));
}

#[test]
fn unconstrained_states_merge_under_true() {
    let a = base_state();
    let b = base_state();
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    assert_eq!(merged.path_a, bool_const(true));
    let check = is_merge_possible(&EnumeratingSolver::new(), &a, &b, &merged.constraints);
    assert_eq!(check, Ok(MergeCheck::Possible));
}

#[test]
fn merge_cpu_into_third_file() {
    let (mut a, mut b) = forked_pair();
    set_reg(&mut a, "rdx", qword(0x10));
    set_reg(&mut b, "rdx", qword(0x20));
    let mut dest = base_state();
    set_reg(&mut dest, "rbx", qword(0x99));
    let selector = bool_var("s");
    merge_cpu(&a.cpu, &b.cpu, &mut dest.cpu, &selector).unwrap();
    assert_eq!(
        reg(&dest, "rdx"),
        ite_bv(64, selector.clone(), qword(0x10), qword(0x20)).unwrap(),
    );
    // Registers equal in a and b are not written
    assert_eq!(reg(&dest, "rbx"), qword(0x99));
}

#[test]
fn merge_rejects_mismatched_layouts() {
    let (a, _) = forked_pair();
    let mut other = RegisterLayout::new();
    other.add("rax", 32);
    let b = ExecutionState::with_layout(std::rc::Rc::new(other));
    let merged = merge_constraints(&a.constraints, &b.constraints).unwrap();
    let result = merge(a, b, &merged.path_a, merged.constraints);
    assert_eq!(result.unwrap_err(), Error::RegisterLayoutMismatch);
}

#[test]
fn merger_retains_rejected_pairs() {
    let mut merger = Merger::new(EnumeratingSolver::new());
    let (mut a, mut b) = forked_pair();
    write_output(&mut a, &bytes(b"yes"));
    write_output(&mut b, &bytes(b"no"));
    let a_before = a.clone();
    let b_before = b.clone();
    match merger.try_merge(a, b).unwrap() {
        MergeOutcome::BothRetained { a, b, reason } => {
            assert_eq!(reason, Inequivalence::SocketOperations);
            assert_eq!(a, a_before);
            assert_eq!(b, b_before);
        }
        MergeOutcome::Merged(_) => panic!("States with different output were merged"),
    }

    let (mut a, mut b) = forked_pair();
    set_reg(&mut a, "rax", qword(1));
    set_reg(&mut b, "rax", qword(2));
    let state = match merger.try_merge(a, b).unwrap() {
        MergeOutcome::Merged(state) => state,
        MergeOutcome::BothRetained { reason, .. } => panic!("Merge rejected: {}", reason),
    };
    assert_eq!(state.constraints.len(), 1);
    assert!(reg(&state, "rax").if_ite().is_some());

    let stats = merger.stats();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.merged, 1);
    assert_eq!(stats.rejections(Inequivalence::SocketOperations), 1);
    assert_eq!(stats.rejections(Inequivalence::Memory), 0);
}

#[test]
fn merged_state_can_be_merged_again() {
    let mut merger = Merger::new(EnumeratingSolver::new());
    let (mut a, mut b) = forked_pair();
    set_reg(&mut a, "rax", qword(1));
    set_reg(&mut b, "rax", qword(2));
    let first = match merger.try_merge(a.clone(), b).unwrap() {
        MergeOutcome::Merged(state) => state,
        MergeOutcome::BothRetained { reason, .. } => panic!("Merge rejected: {}", reason),
    };
    set_reg(&mut a, "rax", qword(3));
    let second = match merger.try_merge(first, a).unwrap() {
        MergeOutcome::Merged(state) => state,
        MergeOutcome::BothRetained { reason, .. } => panic!("Merge rejected: {}", reason),
    };
    let rax = reg(&second, "rax");
    let outer = rax.if_ite().unwrap();
    assert!(outer.if_true.if_ite().is_some());
    assert_eq!(outer.if_false, qword(3));
    assert_eq!(merger.stats().merged, 2);
}
