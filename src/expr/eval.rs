//! Concrete evaluation of expressions under a variable assignment.

use std::collections::BTreeMap;
use std::rc::Rc;

use fxhash::FxHashMap;

use super::{ArithOpType, Expr, ExprType, Sort};
use crate::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Value {
    Bool(bool),
    /// Value, width
    BitVec(u64, u8),
}

impl Value {
    pub fn if_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

/// Variable name -> value. Booleans are nonzero for true.
pub type Assignment = FxHashMap<Rc<str>, u64>;

/// Evaluates `expr`. Returns `None` if a variable has no value in `assignment`.
pub fn eval(expr: &Expr, assignment: &Assignment) -> Option<Value> {
    match expr.ty {
        ExprType::Bool(b) => Some(Value::Bool(b)),
        ExprType::Constant(c, width) => Some(Value::BitVec(c, width)),
        ExprType::Variable(ref name, sort) => {
            let value = *assignment.get(name)?;
            Some(match sort {
                Sort::Bool => Value::Bool(value != 0),
                Sort::BitVec(width) => Value::BitVec(value & sort.mask(), width),
            })
        }
        ExprType::Not(ref val) => match eval(val, assignment)? {
            Value::Bool(b) => Some(Value::Bool(!b)),
            Value::BitVec(c, width) => Some(Value::BitVec(!c & Sort::BitVec(width).mask(), width)),
        },
        ExprType::Ite(ref ite) => {
            let condition = eval(&ite.condition, assignment)?.if_bool()?;
            match condition {
                true => eval(&ite.if_true, assignment),
                false => eval(&ite.if_false, assignment),
            }
        }
        ExprType::Arithmetic(ref arith) => {
            let left = eval(&arith.left, assignment)?;
            let right = eval(&arith.right, assignment)?;
            eval_arith(arith.ty, left, right)
        }
    }
}

fn eval_arith(ty: ArithOpType, left: Value, right: Value) -> Option<Value> {
    use self::ArithOpType::*;
    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => match ty {
            And => Some(Value::Bool(l && r)),
            Or => Some(Value::Bool(l || r)),
            Xor => Some(Value::Bool(l != r)),
            Equal => Some(Value::Bool(l == r)),
            _ => None,
        },
        (Value::BitVec(l, width), Value::BitVec(r, r_width)) if width == r_width => {
            let mask = Sort::BitVec(width).mask();
            let bits = width as u64;
            let value = match ty {
                Add => l.wrapping_add(r),
                Sub => l.wrapping_sub(r),
                Mul => l.wrapping_mul(r),
                And => l & r,
                Or => l | r,
                Xor => l ^ r,
                Lsh => if r >= bits { 0 } else { l << r },
                Rsh => if r >= bits { 0 } else { l >> r },
                Equal => return Some(Value::Bool(l == r)),
                GreaterThan => return Some(Value::Bool(l > r)),
            };
            Some(Value::BitVec(value & mask, width))
        }
        _ => None,
    }
}

/// Collects the variables of all `exprs`, sorted by name.
///
/// A name used with two different sorts is an error.
pub fn free_variables<'a, I>(exprs: I) -> Result<Vec<(Rc<str>, Sort)>, Error>
where I: IntoIterator<Item = &'a Rc<Expr>>,
{
    let mut vars: BTreeMap<Rc<str>, Sort> = BTreeMap::new();
    for expr in exprs {
        for (name, sort) in expr.iter().filter_map(|x| x.if_variable()) {
            match vars.get(name) {
                Some(&old) if old != sort => return Err(Error::SortMismatch(old, sort)),
                Some(_) => (),
                None => {
                    vars.insert(name.clone(), sort);
                }
            }
        }
    }
    Ok(vars.into_iter().collect())
}

#[test]
fn eval_wraps_to_width() {
    use super::expr_helpers::*;
    let mut assignment = Assignment::default();
    assignment.insert("a".into(), 0xff);
    let sum = expr_add(byte_var("a"), byte(2)).unwrap();
    assert_eq!(eval(&sum, &assignment), Some(Value::BitVec(1, 8)));
    let shifted = expr_lsh(byte_var("a"), byte(9)).unwrap();
    assert_eq!(eval(&shifted, &assignment), Some(Value::BitVec(0, 8)));
    let inverted = expr_not(byte_var("a"));
    assert_eq!(eval(&inverted, &assignment), Some(Value::BitVec(0, 8)));
    let gt = expr_gt(byte_var("a"), byte(0x80)).unwrap();
    assert_eq!(eval(&gt, &assignment), Some(Value::Bool(true)));
}

#[test]
fn eval_ite_and_missing_variable() {
    use super::expr_helpers::*;
    let p = var("p", Sort::Bool);
    let sel = ite_bv(64, p, constval(5, 64), constval(7, 64)).unwrap();
    let mut assignment = Assignment::default();
    assert_eq!(eval(&sel, &assignment), None);
    assignment.insert("p".into(), 1);
    assert_eq!(eval(&sel, &assignment), Some(Value::BitVec(5, 64)));
    assignment.insert("p".into(), 0);
    assert_eq!(eval(&sel, &assignment), Some(Value::BitVec(7, 64)));
}

#[test]
fn free_variables_conflict() {
    use super::expr_helpers::*;
    let a = expr_eq(byte_var("x"), byte(1)).unwrap();
    let b = expr_eq(var("x", Sort::BitVec(16)), constval(1, 16)).unwrap();
    let c = expr_eq(byte_var("y"), byte_var("x")).unwrap();
    let vars = free_variables(&[a.clone(), c]).unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(&*vars[0].0, "x");
    assert_eq!(&*vars[1].0, "y");
    assert!(free_variables(&[a, b]).is_err());
}
