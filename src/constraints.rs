use std::fmt;
use std::rc::Rc;
use std::slice;

use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::expr::expr_helpers::{bool_const, expr_and};
use crate::expr::Expr;
use crate::Error;

/// Path condition of a state; the conjunction of the contained boolean expressions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintSet {
    constraints: SmallVec<[Rc<Expr>; 4]>,
}

impl ConstraintSet {
    pub fn new() -> ConstraintSet {
        ConstraintSet {
            constraints: SmallVec::new(),
        }
    }

    /// A set holding exactly `expr`.
    pub fn from_expr(expr: Rc<Expr>) -> Result<ConstraintSet, Error> {
        let mut result = ConstraintSet::new();
        result.add(expr)?;
        Ok(result)
    }

    pub fn add(&mut self, constraint: Rc<Expr>) -> Result<(), Error> {
        if !constraint.sort().is_bool() {
            return Err(Error::NotBoolean(constraint.sort()));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Returns a copy with `constraint` added.
    pub fn with(&self, constraint: Rc<Expr>) -> Result<ConstraintSet, Error> {
        let mut result = self.clone();
        result.add(constraint)?;
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Rc<Expr>> {
        self.constraints.iter()
    }

    pub fn as_slice(&self) -> &[Rc<Expr>] {
        &self.constraints
    }

    /// Folds the set to `((c0 & c1) & c2) ...`.
    ///
    /// A single constraint is returned as is, an empty set is `true`.
    pub fn conjunction(&self) -> Result<Rc<Expr>, Error> {
        let mut iter = self.constraints.iter();
        let first = match iter.next() {
            Some(s) => s.clone(),
            None => return Ok(bool_const(true)),
        };
        iter.try_fold(first, |acc, next| expr_and(acc, next.clone()))
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type Item = &'a Rc<Expr>;
    type IntoIter = slice::Iter<'a, Rc<Expr>>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.constraints.is_empty() {
            return write!(f, "true");
        }
        for (i, c) in self.constraints.iter().enumerate() {
            if i != 0 {
                write!(f, " & ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

#[test]
fn conjunction_is_left_folded() {
    use crate::expr::expr_helpers::*;
    use crate::expr::Sort;
    let a = var("a", Sort::Bool);
    let b = var("b", Sort::Bool);
    let c = var("c", Sort::Bool);
    let mut set = ConstraintSet::new();
    assert_eq!(set.conjunction().unwrap(), bool_const(true));
    set.add(a.clone()).unwrap();
    assert_eq!(set.conjunction().unwrap(), a);
    set.add(b.clone()).unwrap();
    set.add(c.clone()).unwrap();
    let expected = expr_and(expr_and(a, b).unwrap(), c).unwrap();
    assert_eq!(set.conjunction().unwrap(), expected);
    assert_eq!(set.to_string(), "a & b & c");
}

#[test]
fn rejects_non_boolean() {
    use crate::expr::expr_helpers::*;
    use crate::expr::Sort;
    let mut set = ConstraintSet::new();
    assert_eq!(set.add(byte_var("x")), Err(Error::NotBoolean(Sort::BitVec(8))));
    assert!(set.is_empty());
    assert!(ConstraintSet::from_expr(constval(1, 1)).is_err());
    let set = ConstraintSet::from_expr(expr_eq(byte_var("x"), byte(1)).unwrap()).unwrap();
    assert_eq!(set.len(), 1);
}
