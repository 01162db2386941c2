// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The symbolic term layer: immutable bit-vector, boolean and array terms in
//! the quantifier-free bit-vector + array theory, with local algebraic
//! simplification at construction time.
//!
//! Terms are reference-counted and structurally shared; equality and hashing
//! are *structural* (annotations excluded). Semantic questions go through the
//! solver gateway in [`solver`].
//!
//! Division semantics follow the EVM rather than SMT-LIB: `udiv`, `sdiv`,
//! `urem` and `srem` by zero produce zero. Backends translating terms to an
//! external solver must preserve this.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

pub mod backend;
pub mod constraints;
pub mod solver;

pub use constraints::Constraints;
pub use solver::{Model, SatResult, Solver, SolverBackend};

/// An opaque annotation attached to a term. Annotations thread metadata
/// (taint, provenance) through operations; binary operators union them.
pub type Annotation = Rc<dyn Any>;

/// The sort of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    BitVec(u32),
    Bool,
    Array { domain: u32, range: u32 },
}

/// Operator tags for structured terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Not,
    Shl,
    LShr,
    AShr,
    Concat,
    Extract(u32, u32),
    ZeroExt(u32),
    SignExt(u32),
    ULt,
    ULe,
    UGt,
    UGe,
    SLt,
    SLe,
    SGt,
    SGe,
    Eq,
    BoolAnd,
    BoolOr,
    BoolNot,
    Implies,
    Ite,
    Select,
    Store,
}

#[derive(Debug, Clone)]
pub enum TermNode {
    /// Concrete bit-vector value (width lives in the sort).
    Bits(BigUint),
    /// Concrete boolean.
    Boolean(bool),
    /// Free symbol of any sort.
    Symbol(Rc<str>),
    /// Constant array: every key maps to the given term.
    ConstArray(Term),
    /// Operator application.
    App(Op, Vec<Term>),
}

struct TermData {
    node: TermNode,
    sort: Sort,
    annotations: Vec<Annotation>,
}

/// An immutable symbolic term.
#[derive(Clone)]
pub struct Term(Rc<TermData>);

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.sort() == other.sort() && node_eq(self.node(), other.node())
    }
}

impl Eq for Term {}

fn node_eq(a: &TermNode, b: &TermNode) -> bool {
    match (a, b) {
        (TermNode::Bits(x), TermNode::Bits(y)) => x == y,
        (TermNode::Boolean(x), TermNode::Boolean(y)) => x == y,
        (TermNode::Symbol(x), TermNode::Symbol(y)) => x == y,
        (TermNode::ConstArray(x), TermNode::ConstArray(y)) => x == y,
        (TermNode::App(ox, ax), TermNode::App(oy, ay)) => ox == oy && ax == ay,
        _ => false,
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort().hash(state);
        match self.node() {
            TermNode::Bits(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            TermNode::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            TermNode::Symbol(name) => {
                2u8.hash(state);
                name.hash(state);
            }
            TermNode::ConstArray(t) => {
                3u8.hash(state);
                t.hash(state);
            }
            TermNode::App(op, args) => {
                4u8.hash(state);
                op.hash(state);
                args.hash(state);
            }
        }
    }
}

fn mask(width: u32) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

/// Two's-complement reading of a `width`-bit value.
fn to_signed(v: &BigUint, width: u32) -> BigInt {
    let sign_bit = BigUint::one() << (width - 1);
    if v >= &sign_bit {
        BigInt::from(v.clone()) - (BigInt::one() << width)
    } else {
        BigInt::from(v.clone())
    }
}

/// Back to the unsigned `width`-bit representation.
fn from_signed(v: BigInt, width: u32) -> BigUint {
    let modulus = BigInt::one() << width;
    let mut v = v % &modulus;
    if v.sign() == Sign::Minus {
        v += &modulus;
    }
    v.to_biguint().expect("non-negative after normalisation")
}

fn union_annotations(terms: &[&Term]) -> Vec<Annotation> {
    let mut out: Vec<Annotation> = Vec::new();
    for t in terms {
        for a in &t.0.annotations {
            if !out.iter().any(|e| Rc::ptr_eq(e, a)) {
                out.push(a.clone());
            }
        }
    }
    out
}

fn new_term(node: TermNode, sort: Sort, annotations: Vec<Annotation>) -> Term {
    Term(Rc::new(TermData {
        node,
        sort,
        annotations,
    }))
}

// ---- factories -------------------------------------------------------------

/// A concrete bit-vector from a machine integer.
pub fn bv(value: u64, width: u32) -> Term {
    bv_from_biguint(BigUint::from(value), width)
}

/// A concrete bit-vector; the value is reduced modulo `2^width`.
pub fn bv_from_biguint(value: BigUint, width: u32) -> Term {
    new_term(
        TermNode::Bits(value & mask(width)),
        Sort::BitVec(width),
        Vec::new(),
    )
}

/// A concrete bit-vector from big-endian bytes; `width = 8 * bytes.len()`.
pub fn bv_from_bytes(bytes: &[u8]) -> Term {
    assert!(!bytes.is_empty(), "empty byte string has no width");
    bv_from_biguint(BigUint::from_bytes_be(bytes), 8 * bytes.len() as u32)
}

/// A fresh symbolic bit-vector.
pub fn bv_sym(name: &str, width: u32) -> Term {
    new_term(
        TermNode::Symbol(Rc::from(name)),
        Sort::BitVec(width),
        Vec::new(),
    )
}

pub fn bool_val(value: bool) -> Term {
    new_term(TermNode::Boolean(value), Sort::Bool, Vec::new())
}

pub fn bool_sym(name: &str) -> Term {
    new_term(TermNode::Symbol(Rc::from(name)), Sort::Bool, Vec::new())
}

/// The constant array mapping every `domain`-bit key to `default`.
pub fn const_array(domain: u32, default: Term) -> Term {
    let range = default.expect_bv("const_array default");
    new_term(
        TermNode::ConstArray(default),
        Sort::Array { domain, range },
        Vec::new(),
    )
}

/// A fresh symbolic array.
pub fn array_sym(name: &str, domain: u32, range: u32) -> Term {
    new_term(
        TermNode::Symbol(Rc::from(name)),
        Sort::Array { domain, range },
        Vec::new(),
    )
}

// ---- accessors -------------------------------------------------------------

impl Term {
    pub fn sort(&self) -> Sort {
        self.0.sort
    }

    pub fn node(&self) -> &TermNode {
        &self.0.node
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.0.annotations
    }

    /// A copy of this term carrying one extra annotation.
    pub fn annotate(&self, annotation: Annotation) -> Term {
        let mut annotations = self.0.annotations.clone();
        if !annotations.iter().any(|e| Rc::ptr_eq(e, &annotation)) {
            annotations.push(annotation);
        }
        new_term(self.0.node.clone(), self.0.sort, annotations)
    }

    /// Bit width; panics when applied to a non-bit-vector.
    pub fn width(&self) -> u32 {
        self.expect_bv("width")
    }

    fn expect_bv(&self, what: &str) -> u32 {
        match self.sort() {
            Sort::BitVec(w) => w,
            other => panic!("width mismatch: {} expects a bit-vector, got {:?}", what, other),
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self.node(), TermNode::Bits(_) | TermNode::Boolean(_))
    }

    pub fn as_biguint(&self) -> Option<&BigUint> {
        match self.node() {
            TermNode::Bits(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.node() {
            TermNode::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_biguint().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_biguint().and_then(|v| usize::try_from(v).ok())
    }

    /// Big-endian bytes of a concrete bit-vector, left-padded to the term's
    /// full byte width.
    pub fn to_be_bytes(&self) -> Option<Vec<u8>> {
        let width = match self.sort() {
            Sort::BitVec(w) => w,
            _ => return None,
        };
        let v = self.as_biguint()?;
        let raw = v.to_bytes_be();
        let len = (width as usize + 7) / 8;
        let mut out = vec![0u8; len];
        out[len - raw.len()..].copy_from_slice(&raw);
        Some(out)
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match self.node() {
            TermNode::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Collects the names of all free symbols in this term.
    pub fn collect_symbols(&self, out: &mut std::collections::BTreeSet<String>) {
        match self.node() {
            TermNode::Symbol(name) => {
                out.insert(name.to_string());
            }
            TermNode::ConstArray(t) => t.collect_symbols(out),
            TermNode::App(_, args) => {
                for a in args {
                    a.collect_symbols(out);
                }
            }
            _ => {}
        }
    }
}

// ---- operator constructors -------------------------------------------------

fn check_same_width(op: Op, a: &Term, b: &Term) -> u32 {
    let wa = a.expect_bv("operand");
    let wb = b.expect_bv("operand");
    assert_eq!(wa, wb, "width mismatch: {:?} over {} and {} bits", op, wa, wb);
    wa
}

fn fold_arith(op: Op, a: &BigUint, b: &BigUint, width: u32) -> BigUint {
    let m = mask(width);
    match op {
        Op::Add => (a + b) & m,
        Op::Sub => {
            let modulus = BigUint::one() << width;
            ((a + &modulus) - b) & m
        }
        Op::Mul => (a * b) & m,
        // EVM semantics: division and remainder by zero yield zero.
        Op::UDiv => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                a / b
            }
        }
        Op::URem => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                a % b
            }
        }
        Op::SDiv => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                let (sa, sb) = (to_signed(a, width), to_signed(b, width));
                // Truncating division, like the EVM.
                from_signed(&sa / &sb, width)
            }
        }
        Op::SRem => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                let (sa, sb) = (to_signed(a, width), to_signed(b, width));
                from_signed(&sa % &sb, width)
            }
        }
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        Op::Shl => {
            let shift = u64::try_from(b).unwrap_or(u64::from(width));
            if shift >= u64::from(width) {
                BigUint::zero()
            } else {
                (a << shift) & m
            }
        }
        Op::LShr => {
            let shift = u64::try_from(b).unwrap_or(u64::from(width));
            if shift >= u64::from(width) {
                BigUint::zero()
            } else {
                a >> shift
            }
        }
        Op::AShr => {
            let shift = u64::try_from(b).unwrap_or(u64::from(width));
            let sa = to_signed(a, width);
            let shifted = if shift >= u64::from(width) {
                if sa.sign() == Sign::Minus {
                    BigInt::from(-1)
                } else {
                    BigInt::zero()
                }
            } else {
                sa >> shift
            };
            from_signed(shifted, width)
        }
        _ => unreachable!("fold_arith: {:?} is not arithmetic", op),
    }
}

impl Term {
    fn arith(&self, op: Op, other: &Term) -> Term {
        let width = check_same_width(op, self, other);
        let annotations = union_annotations(&[self, other]);
        if let (Some(a), Some(b)) = (self.as_biguint(), other.as_biguint()) {
            let folded = fold_arith(op, a, b, width);
            return new_term(TermNode::Bits(folded), Sort::BitVec(width), annotations);
        }
        // Identity and absorption rules.
        match op {
            Op::Add => {
                if self.is_zero() {
                    return other.clone();
                }
                if other.is_zero() {
                    return self.clone();
                }
            }
            Op::Sub => {
                if other.is_zero() {
                    return self.clone();
                }
                if self == other {
                    return bv(0, width);
                }
            }
            Op::Mul => {
                if self.is_zero() || other.is_zero() {
                    return bv(0, width);
                }
                if self.is_one() {
                    return other.clone();
                }
                if other.is_one() {
                    return self.clone();
                }
            }
            Op::And => {
                if self.is_zero() || other.is_zero() {
                    return bv(0, width);
                }
                if self.is_all_ones() {
                    return other.clone();
                }
                if other.is_all_ones() {
                    return self.clone();
                }
            }
            Op::Or => {
                if self.is_zero() {
                    return other.clone();
                }
                if other.is_zero() {
                    return self.clone();
                }
            }
            Op::Xor => {
                if self.is_zero() {
                    return other.clone();
                }
                if other.is_zero() {
                    return self.clone();
                }
                if self == other {
                    return bv(0, width);
                }
            }
            Op::Shl | Op::LShr | Op::AShr => {
                if other.is_zero() {
                    return self.clone();
                }
            }
            _ => {}
        }
        new_term(
            TermNode::App(op, vec![self.clone(), other.clone()]),
            Sort::BitVec(width),
            annotations,
        )
    }

    pub fn add(&self, other: &Term) -> Term {
        self.arith(Op::Add, other)
    }
    pub fn sub(&self, other: &Term) -> Term {
        self.arith(Op::Sub, other)
    }
    pub fn mul(&self, other: &Term) -> Term {
        self.arith(Op::Mul, other)
    }
    pub fn udiv(&self, other: &Term) -> Term {
        self.arith(Op::UDiv, other)
    }
    pub fn sdiv(&self, other: &Term) -> Term {
        self.arith(Op::SDiv, other)
    }
    pub fn urem(&self, other: &Term) -> Term {
        self.arith(Op::URem, other)
    }
    pub fn srem(&self, other: &Term) -> Term {
        self.arith(Op::SRem, other)
    }
    pub fn bvand(&self, other: &Term) -> Term {
        self.arith(Op::And, other)
    }
    pub fn bvor(&self, other: &Term) -> Term {
        self.arith(Op::Or, other)
    }
    pub fn bvxor(&self, other: &Term) -> Term {
        self.arith(Op::Xor, other)
    }
    pub fn shl(&self, other: &Term) -> Term {
        self.arith(Op::Shl, other)
    }
    pub fn lshr(&self, other: &Term) -> Term {
        self.arith(Op::LShr, other)
    }
    pub fn ashr(&self, other: &Term) -> Term {
        self.arith(Op::AShr, other)
    }

    pub fn bvnot(&self) -> Term {
        let width = self.expect_bv("bvnot");
        let annotations = union_annotations(&[self]);
        if let Some(v) = self.as_biguint() {
            return new_term(
                TermNode::Bits(v ^ mask(width)),
                Sort::BitVec(width),
                annotations,
            );
        }
        if let TermNode::App(Op::Not, args) = self.node() {
            return args[0].clone();
        }
        new_term(
            TermNode::App(Op::Not, vec![self.clone()]),
            Sort::BitVec(width),
            annotations,
        )
    }

    fn compare(&self, op: Op, other: &Term) -> Term {
        let width = check_same_width(op, self, other);
        let annotations = union_annotations(&[self, other]);
        if let (Some(a), Some(b)) = (self.as_biguint(), other.as_biguint()) {
            let result = match op {
                Op::ULt => a < b,
                Op::ULe => a <= b,
                Op::UGt => a > b,
                Op::UGe => a >= b,
                Op::SLt => to_signed(a, width) < to_signed(b, width),
                Op::SLe => to_signed(a, width) <= to_signed(b, width),
                Op::SGt => to_signed(a, width) > to_signed(b, width),
                Op::SGe => to_signed(a, width) >= to_signed(b, width),
                _ => unreachable!(),
            };
            return new_term(TermNode::Boolean(result), Sort::Bool, annotations);
        }
        new_term(
            TermNode::App(op, vec![self.clone(), other.clone()]),
            Sort::Bool,
            annotations,
        )
    }

    pub fn ult(&self, other: &Term) -> Term {
        self.compare(Op::ULt, other)
    }
    pub fn ule(&self, other: &Term) -> Term {
        self.compare(Op::ULe, other)
    }
    pub fn ugt(&self, other: &Term) -> Term {
        self.compare(Op::UGt, other)
    }
    pub fn uge(&self, other: &Term) -> Term {
        self.compare(Op::UGe, other)
    }
    pub fn slt(&self, other: &Term) -> Term {
        self.compare(Op::SLt, other)
    }
    pub fn sle(&self, other: &Term) -> Term {
        self.compare(Op::SLe, other)
    }
    pub fn sgt(&self, other: &Term) -> Term {
        self.compare(Op::SGt, other)
    }
    pub fn sge(&self, other: &Term) -> Term {
        self.compare(Op::SGe, other)
    }

    /// Structural-aware equality term.
    pub fn eq_term(&self, other: &Term) -> Term {
        assert_eq!(
            self.sort(),
            other.sort(),
            "width mismatch: Eq over {:?} and {:?}",
            self.sort(),
            other.sort()
        );
        let annotations = union_annotations(&[self, other]);
        if self == other {
            return new_term(TermNode::Boolean(true), Sort::Bool, annotations);
        }
        if self.is_concrete() && other.is_concrete() {
            // Structurally unequal concretes are semantically unequal.
            return new_term(TermNode::Boolean(false), Sort::Bool, annotations);
        }
        new_term(
            TermNode::App(Op::Eq, vec![self.clone(), other.clone()]),
            Sort::Bool,
            annotations,
        )
    }

    pub fn ne_term(&self, other: &Term) -> Term {
        self.eq_term(other).not()
    }

    /// Boolean negation.
    pub fn not(&self) -> Term {
        assert_eq!(self.sort(), Sort::Bool, "width mismatch: Not over {:?}", self.sort());
        let annotations = union_annotations(&[self]);
        if let Some(b) = self.as_bool() {
            return new_term(TermNode::Boolean(!b), Sort::Bool, annotations);
        }
        if let TermNode::App(Op::BoolNot, args) = self.node() {
            return args[0].clone();
        }
        new_term(
            TermNode::App(Op::BoolNot, vec![self.clone()]),
            Sort::Bool,
            annotations,
        )
    }

    fn bool_binop(&self, op: Op, other: &Term) -> Term {
        assert_eq!(self.sort(), Sort::Bool, "width mismatch: {:?}", op);
        assert_eq!(other.sort(), Sort::Bool, "width mismatch: {:?}", op);
        let annotations = union_annotations(&[self, other]);
        match (op, self.as_bool(), other.as_bool()) {
            (Op::BoolAnd, Some(a), Some(b)) => return bool_val(a && b),
            (Op::BoolAnd, Some(false), _) | (Op::BoolAnd, _, Some(false)) => {
                return new_term(TermNode::Boolean(false), Sort::Bool, annotations)
            }
            (Op::BoolAnd, Some(true), _) => return other.clone(),
            (Op::BoolAnd, _, Some(true)) => return self.clone(),
            (Op::BoolOr, Some(a), Some(b)) => return bool_val(a || b),
            (Op::BoolOr, Some(true), _) | (Op::BoolOr, _, Some(true)) => {
                return new_term(TermNode::Boolean(true), Sort::Bool, annotations)
            }
            (Op::BoolOr, Some(false), _) => return other.clone(),
            (Op::BoolOr, _, Some(false)) => return self.clone(),
            (Op::Implies, Some(false), _) | (Op::Implies, _, Some(true)) => {
                return new_term(TermNode::Boolean(true), Sort::Bool, annotations)
            }
            (Op::Implies, Some(true), _) => return other.clone(),
            _ => {}
        }
        new_term(
            TermNode::App(op, vec![self.clone(), other.clone()]),
            Sort::Bool,
            annotations,
        )
    }

    pub fn and(&self, other: &Term) -> Term {
        self.bool_binop(Op::BoolAnd, other)
    }
    pub fn or(&self, other: &Term) -> Term {
        self.bool_binop(Op::BoolOr, other)
    }
    pub fn implies(&self, other: &Term) -> Term {
        self.bool_binop(Op::Implies, other)
    }

    pub fn concat(&self, other: &Term) -> Term {
        let wa = self.expect_bv("concat");
        let wb = other.expect_bv("concat");
        let annotations = union_annotations(&[self, other]);
        if let (Some(a), Some(b)) = (self.as_biguint(), other.as_biguint()) {
            return new_term(
                TermNode::Bits((a << wb) | b),
                Sort::BitVec(wa + wb),
                annotations,
            );
        }
        new_term(
            TermNode::App(Op::Concat, vec![self.clone(), other.clone()]),
            Sort::BitVec(wa + wb),
            annotations,
        )
    }

    /// Bits `high..=low` of this term (SMT-LIB extract indexing).
    pub fn extract(&self, high: u32, low: u32) -> Term {
        let width = self.expect_bv("extract");
        assert!(
            high >= low && high < width,
            "width mismatch: extract [{high}:{low}] from {width} bits"
        );
        if low == 0 && high == width - 1 {
            return self.clone();
        }
        let out_width = high - low + 1;
        let annotations = union_annotations(&[self]);
        if let Some(v) = self.as_biguint() {
            return new_term(
                TermNode::Bits((v >> low) & mask(out_width)),
                Sort::BitVec(out_width),
                annotations,
            );
        }
        new_term(
            TermNode::App(Op::Extract(high, low), vec![self.clone()]),
            Sort::BitVec(out_width),
            annotations,
        )
    }

    pub fn zero_extend(&self, to_width: u32) -> Term {
        let width = self.expect_bv("zero_extend");
        assert!(to_width >= width, "width mismatch: zero_extend {width} -> {to_width}");
        if to_width == width {
            return self.clone();
        }
        let annotations = union_annotations(&[self]);
        if let Some(v) = self.as_biguint() {
            return new_term(TermNode::Bits(v.clone()), Sort::BitVec(to_width), annotations);
        }
        new_term(
            TermNode::App(Op::ZeroExt(to_width - width), vec![self.clone()]),
            Sort::BitVec(to_width),
            annotations,
        )
    }

    pub fn sign_extend(&self, to_width: u32) -> Term {
        let width = self.expect_bv("sign_extend");
        assert!(to_width >= width, "width mismatch: sign_extend {width} -> {to_width}");
        if to_width == width {
            return self.clone();
        }
        let annotations = union_annotations(&[self]);
        if let Some(v) = self.as_biguint() {
            let extended = from_signed(to_signed(v, width), to_width);
            return new_term(TermNode::Bits(extended), Sort::BitVec(to_width), annotations);
        }
        new_term(
            TermNode::App(Op::SignExt(to_width - width), vec![self.clone()]),
            Sort::BitVec(to_width),
            annotations,
        )
    }

    /// If-then-else over any matching sorts.
    pub fn ite(cond: &Term, then: &Term, els: &Term) -> Term {
        assert_eq!(cond.sort(), Sort::Bool, "width mismatch: Ite condition");
        assert_eq!(
            then.sort(),
            els.sort(),
            "width mismatch: Ite arms {:?} vs {:?}",
            then.sort(),
            els.sort()
        );
        if let Some(c) = cond.as_bool() {
            return if c { then.clone() } else { els.clone() };
        }
        if then == els {
            return then.clone();
        }
        let annotations = union_annotations(&[cond, then, els]);
        new_term(
            TermNode::App(Op::Ite, vec![cond.clone(), then.clone(), els.clone()]),
            then.sort(),
            annotations,
        )
    }

    /// Array read.
    pub fn select(&self, key: &Term) -> Term {
        let (domain, range) = match self.sort() {
            Sort::Array { domain, range } => (domain, range),
            other => panic!("width mismatch: select from non-array {:?}", other),
        };
        assert_eq!(
            key.expect_bv("select key"),
            domain,
            "width mismatch: select key"
        );
        let annotations = union_annotations(&[self, key]);
        // Walk store chains while the keys decide the lookup.
        let mut array = self;
        loop {
            match array.node() {
                TermNode::ConstArray(default) => return default.clone(),
                TermNode::App(Op::Store, args) => {
                    let (inner, k, v) = (&args[0], &args[1], &args[2]);
                    if k == key {
                        return v.clone();
                    }
                    if k.is_concrete() && key.is_concrete() {
                        // Distinct concrete keys: skip this write.
                        array = inner;
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        new_term(
            TermNode::App(Op::Select, vec![array.clone(), key.clone()]),
            Sort::BitVec(range),
            annotations,
        )
    }

    /// Array write.
    pub fn store(&self, key: &Term, value: &Term) -> Term {
        let (domain, range) = match self.sort() {
            Sort::Array { domain, range } => (domain, range),
            other => panic!("width mismatch: store into non-array {:?}", other),
        };
        assert_eq!(key.expect_bv("store key"), domain, "width mismatch: store key");
        assert_eq!(
            value.expect_bv("store value"),
            range,
            "width mismatch: store value"
        );
        let annotations = union_annotations(&[self, key, value]);
        new_term(
            TermNode::App(Op::Store, vec![self.clone(), key.clone(), value.clone()]),
            self.sort(),
            annotations,
        )
    }

    fn is_zero(&self) -> bool {
        self.as_biguint().map(|v| v.is_zero()).unwrap_or(false)
    }

    fn is_one(&self) -> bool {
        self.as_biguint().map(|v| v.is_one()).unwrap_or(false)
    }

    fn is_all_ones(&self) -> bool {
        match (self.as_biguint(), self.sort()) {
            (Some(v), Sort::BitVec(w)) => *v == mask(w),
            _ => false,
        }
    }
}

// ---- substitution & simplification ----------------------------------------

impl Term {
    /// Rebuilds the term bottom-up through the simplifying constructors.
    /// Idempotent; not canonicalising.
    pub fn simplify(&self) -> Term {
        self.substitute(&HashMap::new())
    }

    /// Replaces free symbols by name, rebuilding (and thereby folding) every
    /// node on the way up.
    pub fn substitute(&self, bindings: &HashMap<String, Term>) -> Term {
        let mut memo: HashMap<Term, Term> = HashMap::new();
        self.substitute_inner(bindings, &mut memo)
    }

    fn substitute_inner(
        &self,
        bindings: &HashMap<String, Term>,
        memo: &mut HashMap<Term, Term>,
    ) -> Term {
        if let Some(hit) = memo.get(self) {
            return hit.clone();
        }
        let result = match self.node() {
            TermNode::Bits(_) | TermNode::Boolean(_) => self.clone(),
            TermNode::Symbol(name) => match bindings.get(name.as_ref()) {
                Some(replacement) => {
                    assert_eq!(
                        replacement.sort(),
                        self.sort(),
                        "width mismatch: substitution for {}",
                        name
                    );
                    replacement.clone()
                }
                None => self.clone(),
            },
            TermNode::ConstArray(default) => {
                let default = default.substitute_inner(bindings, memo);
                let domain = match self.sort() {
                    Sort::Array { domain, .. } => domain,
                    _ => unreachable!(),
                };
                const_array(domain, default)
            }
            TermNode::App(op, args) => {
                let args: Vec<Term> = args
                    .iter()
                    .map(|a| a.substitute_inner(bindings, memo))
                    .collect();
                rebuild(*op, &args)
            }
        };
        memo.insert(self.clone(), result.clone());
        result
    }
}

/// Re-applies `op` to already-substituted arguments via the simplifying
/// constructors.
fn rebuild(op: Op, args: &[Term]) -> Term {
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::UDiv | Op::SDiv | Op::URem | Op::SRem | Op::And
        | Op::Or | Op::Xor | Op::Shl | Op::LShr | Op::AShr => args[0].arith(op, &args[1]),
        Op::Not => args[0].bvnot(),
        Op::Concat => args[0].concat(&args[1]),
        Op::Extract(high, low) => args[0].extract(high, low),
        Op::ZeroExt(extra) => args[0].zero_extend(args[0].width() + extra),
        Op::SignExt(extra) => args[0].sign_extend(args[0].width() + extra),
        Op::ULt | Op::ULe | Op::UGt | Op::UGe | Op::SLt | Op::SLe | Op::SGt | Op::SGe => {
            args[0].compare(op, &args[1])
        }
        Op::Eq => args[0].eq_term(&args[1]),
        Op::BoolAnd => args[0].and(&args[1]),
        Op::BoolOr => args[0].or(&args[1]),
        Op::BoolNot => args[0].not(),
        Op::Implies => args[0].implies(&args[1]),
        Op::Ite => Term::ite(&args[0], &args[1], &args[2]),
        Op::Select => args[0].select(&args[1]),
        Op::Store => args[0].store(&args[1], &args[2]),
    }
}

/// Free-function spelling of [`Term::simplify`], matching the usual SMT
/// vocabulary.
pub fn simplify(t: &Term) -> Term {
    t.simplify()
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            TermNode::Bits(v) => write!(f, "#x{:x}[{}]", v, self.width()),
            TermNode::Boolean(b) => write!(f, "{}", b),
            TermNode::Symbol(name) => write!(f, "{}", name),
            TermNode::ConstArray(d) => write!(f, "(K {:?})", d),
            TermNode::App(op, args) => {
                write!(f, "({:?}", op)?;
                for a in args {
                    write!(f, " {:?}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}
