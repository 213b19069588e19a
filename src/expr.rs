use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use fxhash::FxHasher;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

pub mod eval;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sort {
    Bool,
    BitVec(u8),
}

impl Sort {
    pub fn bits(self) -> u32 {
        match self {
            Sort::Bool => 1,
            Sort::BitVec(width) => width as u32,
        }
    }

    pub fn is_bool(self) -> bool {
        self == Sort::Bool
    }

    /// Mask of the bits a value of this sort can have set.
    pub fn mask(self) -> u64 {
        match self.bits() {
            64 => !0,
            x => (1u64 << x) - 1,
        }
    }

    fn check(self) -> Result<Sort, Error> {
        match self {
            Sort::BitVec(width) if width == 0 || width > 64 => Err(Error::InvalidWidth(width)),
            _ => Ok(self),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Sort::Bool => write!(f, "bool"),
            Sort::BitVec(width) => write!(f, "bv{}", width),
        }
    }
}

/// A concrete or symbolic value.
///
/// Expressions are immutable and shared through `Rc`. The hash is computed once on
/// construction, so hashing and the (common) unequal comparison are cheap. The sort and
/// whether the expression contains any variable are cached as well.
#[derive(Clone, Eq)]
pub struct Expr {
    pub ty: ExprType,
    sort: Sort,
    symbolic: bool,
    hash: u64,
}

#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprType {
    Bool(bool),
    /// Value, width in bits. The value never has bits set above the width.
    Constant(u64, u8),
    Variable(Rc<str>, Sort),
    Arithmetic(ArithOperand),
    /// Logical not for booleans, bitwise not for bit-vectors.
    Not(Rc<Expr>),
    Ite(IteOperand),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArithOperand {
    pub ty: ArithOpType,
    pub left: Rc<Expr>,
    pub right: Rc<Expr>,
}

/// And, Or, Xor and Equal accept booleans as well, the rest are bit-vector only.
/// Equal and GreaterThan (unsigned) produce a boolean.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArithOpType {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Lsh,
    Rsh,
    Equal,
    GreaterThan,
}

impl ArithOpType {
    pub fn is_compare_op(self) -> bool {
        match self {
            ArithOpType::Equal | ArithOpType::GreaterThan => true,
            _ => false,
        }
    }

    fn accepts_bool(self) -> bool {
        match self {
            ArithOpType::And | ArithOpType::Or | ArithOpType::Xor | ArithOpType::Equal => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IteOperand {
    pub condition: Rc<Expr>,
    pub if_true: Rc<Expr>,
    pub if_false: Rc<Expr>,
}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state)
    }
}

// Short-circuit the common case of aliasing pointers
impl PartialEq for Expr {
    fn eq(&self, other: &Expr) -> bool {
        if other as *const Expr == self as *const Expr {
            true
        } else if self.hash != other.hash {
            false
        } else {
            self.ty == other.ty
        }
    }
}

impl Ord for Expr {
    fn cmp(&self, other: &Expr) -> Ordering {
        if other as *const Expr == self as *const Expr {
            Ordering::Equal
        } else {
            self.ty.cmp(&other.ty)
        }
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Expr) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ArithOpType::*;

        match self.ty {
            ExprType::Bool(val) => write!(f, "{}", val),
            ExprType::Constant(val, _) => write!(f, "{:x}", val),
            ExprType::Variable(ref name, _) => write!(f, "{}", name),
            ExprType::Arithmetic(ref arith) => {
                let l = &arith.left;
                let r = &arith.right;
                match arith.ty {
                    Add => write!(f, "({} + {})", l, r),
                    Sub => write!(f, "({} - {})", l, r),
                    Mul => write!(f, "({} * {})", l, r),
                    And => write!(f, "({} & {})", l, r),
                    Or => write!(f, "({} | {})", l, r),
                    Xor => write!(f, "({} ^ {})", l, r),
                    Lsh => write!(f, "({} << {})", l, r),
                    Rsh => write!(f, "({} >> {})", l, r),
                    Equal => write!(f, "({} == {})", l, r),
                    GreaterThan => write!(f, "({} > {})", l, r),
                }
            }
            ExprType::Not(ref val) => match val.sort {
                Sort::Bool => write!(f, "!{}", val),
                Sort::BitVec(_) => write!(f, "~{}", val),
            },
            ExprType::Ite(ref ite) => {
                write!(f, "ite({}, {}, {})", ite.condition, ite.if_true, ite.if_false)
            }
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for Expr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ty.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Expr, D::Error> {
        let ty = ExprType::deserialize(deserializer)?;
        Expr::from_type(ty).map_err(serde::de::Error::custom)
    }
}

fn check_same_sort(left: &Expr, right: &Expr) -> Result<Sort, Error> {
    if left.sort != right.sort {
        Err(Error::SortMismatch(left.sort, right.sort))
    } else {
        Ok(left.sort)
    }
}

fn sort_of(ty: &ExprType) -> Result<Sort, Error> {
    match *ty {
        ExprType::Bool(_) => Ok(Sort::Bool),
        ExprType::Constant(value, width) => {
            let sort = Sort::BitVec(width).check()?;
            if value & !sort.mask() != 0 {
                return Err(Error::InvalidWidth(width));
            }
            Ok(sort)
        }
        ExprType::Variable(_, sort) => sort.check(),
        ExprType::Arithmetic(ref arith) => {
            let sort = check_same_sort(&arith.left, &arith.right)?;
            if sort.is_bool() && !arith.ty.accepts_bool() {
                return Err(Error::NotBitVector(sort));
            }
            match arith.ty.is_compare_op() {
                true => Ok(Sort::Bool),
                false => Ok(sort),
            }
        }
        ExprType::Not(ref val) => Ok(val.sort),
        ExprType::Ite(ref ite) => {
            if !ite.condition.sort.is_bool() {
                return Err(Error::NotBoolean(ite.condition.sort));
            }
            check_same_sort(&ite.if_true, &ite.if_false)
        }
    }
}

impl Expr {
    /// Validates sorts and builds the expression.
    pub fn from_type(ty: ExprType) -> Result<Expr, Error> {
        let sort = sort_of(&ty)?;
        let symbolic = match ty {
            ExprType::Bool(_) | ExprType::Constant(..) => false,
            ExprType::Variable(..) => true,
            ExprType::Arithmetic(ref arith) => arith.left.symbolic || arith.right.symbolic,
            ExprType::Not(ref val) => val.symbolic,
            ExprType::Ite(ref ite) => {
                ite.condition.symbolic || ite.if_true.symbolic || ite.if_false.symbolic
            }
        };
        let mut hasher = FxHasher::default();
        ty.hash(&mut hasher);
        Ok(Expr {
            ty,
            sort,
            symbolic,
            hash: hasher.finish(),
        })
    }

    pub fn new(ty: ExprType) -> Result<Rc<Expr>, Error> {
        Expr::from_type(ty).map(Rc::new)
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    /// True if any variable appears in the expression.
    pub fn is_symbolic(&self) -> bool {
        self.symbolic
    }

    pub fn if_constant(&self) -> Option<u64> {
        match self.ty {
            ExprType::Constant(c, _) => Some(c),
            _ => None,
        }
    }

    pub fn if_bool(&self) -> Option<bool> {
        match self.ty {
            ExprType::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn if_variable(&self) -> Option<(&Rc<str>, Sort)> {
        match self.ty {
            ExprType::Variable(ref name, sort) => Some((name, sort)),
            _ => None,
        }
    }

    pub fn if_arithmetic(&self, ty: ArithOpType) -> Option<(&Rc<Expr>, &Rc<Expr>)> {
        match self.ty {
            ExprType::Arithmetic(ref arith) if arith.ty == ty => {
                Some((&arith.left, &arith.right))
            }
            _ => None,
        }
    }

    pub fn if_ite(&self) -> Option<&IteOperand> {
        match self.ty {
            ExprType::Ite(ref ite) => Some(ite),
            _ => None,
        }
    }

    /// Iterates through all subexpressions, including `self`, depth first.
    pub fn iter(&self) -> Iter {
        let mut stack = SmallVec::new();
        stack.push(self);
        Iter {
            stack,
        }
    }
}

pub struct Iter<'a> {
    stack: SmallVec<[&'a Expr; 8]>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Expr;
    fn next(&mut self) -> Option<&'a Expr> {
        let next = self.stack.pop()?;
        match next.ty {
            ExprType::Bool(_) | ExprType::Constant(..) | ExprType::Variable(..) => (),
            ExprType::Arithmetic(ref arith) => {
                self.stack.push(&arith.right);
                self.stack.push(&arith.left);
            }
            ExprType::Not(ref val) => self.stack.push(val),
            ExprType::Ite(ref ite) => {
                self.stack.push(&ite.if_false);
                self.stack.push(&ite.if_true);
                self.stack.push(&ite.condition);
            }
        }
        Some(next)
    }
}

pub mod expr_helpers {
    use std::rc::Rc;

    use super::ArithOpType::*;
    use super::{ArithOpType, ArithOperand, Expr, ExprType, IteOperand, Sort};
    use crate::Error;

    fn leaf(ty: ExprType) -> Rc<Expr> {
        match Expr::new(ty) {
            Ok(o) => o,
            Err(e) => panic!("Invalid leaf expression: {}", e),
        }
    }

    /// Panics if `width` is not in 1..=64.
    pub fn constval(value: u64, width: u8) -> Rc<Expr> {
        assert!(width >= 1 && width <= 64, "Invalid width {}", width);
        leaf(ExprType::Constant(value & Sort::BitVec(width).mask(), width))
    }

    pub fn byte(value: u8) -> Rc<Expr> {
        constval(value as u64, 8)
    }

    pub fn bytes(values: &[u8]) -> Vec<Rc<Expr>> {
        values.iter().map(|&x| byte(x)).collect()
    }

    pub fn bool_const(value: bool) -> Rc<Expr> {
        leaf(ExprType::Bool(value))
    }

    /// Panics if `sort` is a bit-vector with width not in 1..=64.
    pub fn var(name: &str, sort: Sort) -> Rc<Expr> {
        leaf(ExprType::Variable(name.into(), sort))
    }

    pub fn byte_var(name: &str) -> Rc<Expr> {
        var(name, Sort::BitVec(8))
    }

    pub fn expr_arith(ty: ArithOpType, lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        Expr::new(ExprType::Arithmetic(ArithOperand {
            ty,
            left: lhs,
            right: rhs,
        }))
    }

    pub fn expr_add(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Add, lhs, rhs)
    }

    pub fn expr_sub(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Sub, lhs, rhs)
    }

    pub fn expr_mul(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Mul, lhs, rhs)
    }

    pub fn expr_and(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(And, lhs, rhs)
    }

    pub fn expr_or(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Or, lhs, rhs)
    }

    pub fn expr_xor(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Xor, lhs, rhs)
    }

    pub fn expr_lsh(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Lsh, lhs, rhs)
    }

    pub fn expr_rsh(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Rsh, lhs, rhs)
    }

    pub fn expr_eq(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(Equal, lhs, rhs)
    }

    pub fn expr_gt(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        expr_arith(GreaterThan, lhs, rhs)
    }

    pub fn expr_not(val: Rc<Expr>) -> Rc<Expr> {
        leaf(ExprType::Not(val))
    }

    /// Boolean select; both branches have to be booleans.
    pub fn ite(condition: Rc<Expr>, if_true: Rc<Expr>, if_false: Rc<Expr>) -> Result<Rc<Expr>, Error> {
        if !if_true.sort().is_bool() {
            return Err(Error::SortMismatch(Sort::Bool, if_true.sort()));
        }
        Expr::new(ExprType::Ite(IteOperand {
            condition,
            if_true,
            if_false,
        }))
    }

    /// Bit-vector select; both branches have to be `width` bits wide.
    pub fn ite_bv(
        width: u8,
        condition: Rc<Expr>,
        if_true: Rc<Expr>,
        if_false: Rc<Expr>,
    ) -> Result<Rc<Expr>, Error> {
        let sort = Sort::BitVec(width);
        if if_true.sort() != sort {
            return Err(Error::SortMismatch(sort, if_true.sort()));
        }
        Expr::new(ExprType::Ite(IteOperand {
            condition,
            if_true,
            if_false,
        }))
    }
}

#[test]
fn sort_checks() {
    use self::expr_helpers::*;
    let x = var("x", Sort::BitVec(32));
    let b = byte_var("b");
    assert_eq!(
        expr_eq(x.clone(), b.clone()).unwrap_err(),
        Error::SortMismatch(Sort::BitVec(32), Sort::BitVec(8)),
    );
    assert_eq!(expr_eq(x.clone(), constval(4, 32)).unwrap().sort(), Sort::Bool);
    assert_eq!(expr_add(x.clone(), constval(4, 32)).unwrap().sort(), Sort::BitVec(32));
    assert_eq!(
        expr_add(bool_const(true), bool_const(false)).unwrap_err(),
        Error::NotBitVector(Sort::Bool),
    );
    assert_eq!(
        ite_bv(32, x.clone(), x.clone(), x.clone()).unwrap_err(),
        Error::NotBoolean(Sort::BitVec(32)),
    );
    assert_eq!(
        ite_bv(8, bool_const(true), x.clone(), x.clone()).unwrap_err(),
        Error::SortMismatch(Sort::BitVec(8), Sort::BitVec(32)),
    );
    assert_eq!(
        ite_bv(32, bool_const(true), x.clone(), b).unwrap_err(),
        Error::SortMismatch(Sort::BitVec(32), Sort::BitVec(8)),
    );
    assert!(Expr::new(ExprType::Constant(0x100, 8)).is_err());
    assert!(Expr::new(ExprType::Variable("y".into(), Sort::BitVec(65))).is_err());
}

#[test]
fn symbolic_flag() {
    use self::expr_helpers::*;
    let c = expr_add(constval(1, 8), constval(2, 8)).unwrap();
    assert!(!c.is_symbolic());
    let s = expr_add(c.clone(), byte_var("b")).unwrap();
    assert!(s.is_symbolic());
    let sel = ite_bv(8, bool_const(true), c.clone(), c).unwrap();
    assert!(!sel.is_symbolic());
}

#[test]
fn equality_and_display() {
    use self::expr_helpers::*;
    let a = expr_eq(byte_var("a"), byte(0x41)).unwrap();
    let b = expr_eq(byte_var("a"), byte(0x41)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, expr_eq(byte_var("a"), byte(0x42)).unwrap());
    assert_eq!(a.to_string(), "(a == 41)");
    let sel = ite_bv(64, var("p", Sort::Bool), constval(5, 64), constval(7, 64)).unwrap();
    assert_eq!(sel.to_string(), "ite(p, 5, 7)");
    assert_eq!(expr_not(var("p", Sort::Bool)).to_string(), "!p");
}

#[test]
fn iter_visits_all() {
    use self::expr_helpers::*;
    let e = ite(
        expr_gt(byte_var("a"), byte(3)).unwrap(),
        bool_const(true),
        expr_not(var("p", Sort::Bool)),
    ).unwrap();
    let vars = e.iter().filter_map(|x| x.if_variable()).map(|x| x.0.to_string())
        .collect::<Vec<_>>();
    assert_eq!(vars, vec!["a".to_string(), "p".to_string()]);
    assert_eq!(e.iter().count(), 7);
}

#[cfg(feature = "serde")]
#[test]
fn serialize_json() {
    use self::expr_helpers::*;
    let e = ite_bv(8, var("p", Sort::Bool), byte_var("a"), byte(3)).unwrap();
    let json = serde_json::to_vec(&e).unwrap();
    let back: Rc<Expr> = serde_json::from_slice(&json).unwrap();
    assert_eq!(back, e);
    assert_eq!(back.sort(), Sort::BitVec(8));
    assert!(back.is_symbolic());
    // Sorts are checked again when deserializing
    let bad = serde_json::to_vec(&ExprType::Constant(0x100, 8)).unwrap();
    assert!(serde_json::from_slice::<Expr>(&bad).is_err());
}
