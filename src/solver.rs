//! Entailment oracle used by the comparators.

use std::rc::Rc;

use crate::constraints::ConstraintSet;
use crate::expr::eval::{self, Assignment, Value};
use crate::expr::Expr;

/// Answers "does `expr` hold under every assignment satisfying `constraints`".
///
/// Must be free of side effects; the comparators may query it any number of times.
/// Returning `false` when the answer is not known is always sound, it only makes
/// merges less likely.
pub trait Solver {
    fn must_be_true(&self, constraints: &ConstraintSet, expr: &Rc<Expr>) -> bool;
}

impl<F> Solver for F
where F: Fn(&ConstraintSet, &Rc<Expr>) -> bool,
{
    fn must_be_true(&self, constraints: &ConstraintSet, expr: &Rc<Expr>) -> bool {
        self(constraints, expr)
    }
}

pub const DEFAULT_BIT_BUDGET: u32 = 16;
const MAX_BIT_BUDGET: u32 = 32;

/// Decides entailment by trying every assignment of the free variables.
///
/// Exact as long as the free variables of the query fit in `bit_budget` bits total;
/// larger queries are answered with `false`.
#[derive(Clone, Debug)]
pub struct EnumeratingSolver {
    bit_budget: u32,
}

impl EnumeratingSolver {
    pub fn new() -> EnumeratingSolver {
        EnumeratingSolver::with_bit_budget(DEFAULT_BIT_BUDGET)
    }

    /// The budget is capped to 32 bits.
    pub fn with_bit_budget(bits: u32) -> EnumeratingSolver {
        EnumeratingSolver {
            bit_budget: bits.min(MAX_BIT_BUDGET),
        }
    }

    pub fn bit_budget(&self) -> u32 {
        self.bit_budget
    }
}

impl Default for EnumeratingSolver {
    fn default() -> EnumeratingSolver {
        EnumeratingSolver::new()
    }
}

impl Solver for EnumeratingSolver {
    fn must_be_true(&self, constraints: &ConstraintSet, expr: &Rc<Expr>) -> bool {
        if !expr.sort().is_bool() {
            warn!("Non-boolean query {}", expr);
            return false;
        }
        let vars = match eval::free_variables(constraints.iter().chain(Some(expr))) {
            Ok(o) => o,
            Err(e) => {
                warn!("Can't enumerate {}: {}", expr, e);
                return false;
            }
        };
        let total_bits: u32 = vars.iter().map(|x| x.1.bits()).sum();
        if total_bits > self.bit_budget {
            warn!(
                "Query needs {} bits of variables, budget is {}; assuming not provable",
                total_bits, self.bit_budget,
            );
            return false;
        }
        let mut assignment = Assignment::default();
        for n in 0..(1u64 << total_bits) {
            let mut rest = n;
            for &(ref name, sort) in &vars {
                assignment.insert(name.clone(), rest & sort.mask());
                rest >>= sort.bits();
            }
            let feasible = constraints.iter()
                .all(|c| eval::eval(c, &assignment) == Some(Value::Bool(true)));
            if feasible && eval::eval(expr, &assignment) != Some(Value::Bool(true)) {
                trace!("{} is falsified by {:?}", expr, assignment);
                return false;
            }
        }
        true
    }
}
