//! Scalar symbolic expressions.
//!
//! An [`Expr`] is an immutable, reference-counted AST node. Arithmetic is
//! overloaded on owned values; subtrees are shared via `Arc`, so cloning is
//! cheap and differentiation of large expression stacks stays tractable.
//!
//! Conditionals are expression nodes ([`if_less_eq`] and friends), which
//! keeps piecewise functions differentiable branch-by-branch.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Interned symbol handle. Symbols are created through a [`SymbolTable`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub(crate) u32);

impl Symbol {
    /// Index into a dense value slice ordered by symbol id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maps symbol names to dense ids and back.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    index: std::collections::HashMap<String, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the same [`Symbol`] for repeated calls.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&id) = self.index.get(name) {
            return Symbol(id);
        }
        let id = u32::try_from(self.names.len()).expect("symbol table overflow");
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), id);
        Symbol(id)
    }

    /// Look up a symbol without creating it.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.index.get(name).copied().map(Symbol)
    }

    pub fn name(&self, sym: Symbol) -> &str {
        &self.names[sym.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug)]
pub(crate) enum Node {
    Const(f64),
    Sym(Symbol),
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Div(Expr, Expr),
    Neg(Expr),
    /// Base raised to a constant exponent.
    Pow(Expr, f64),
    Sqrt(Expr),
    Abs(Expr),
    Sign(Expr),
    Floor(Expr),
    Sin(Expr),
    Cos(Expr),
    Acos(Expr),
    Min(Expr, Expr),
    Max(Expr, Expr),
    /// `if a <= b { t } else { e }`.
    IfLessEq(Expr, Expr, Expr, Expr),
}

/// A scalar symbolic expression.
#[derive(Clone)]
pub struct Expr(pub(crate) Arc<Node>);

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Node::Const(c) => write!(f, "{c}"),
            Node::Sym(s) => write!(f, "x{}", s.0),
            Node::Add(a, b) => write!(f, "({a:?} + {b:?})"),
            Node::Sub(a, b) => write!(f, "({a:?} - {b:?})"),
            Node::Mul(a, b) => write!(f, "({a:?} * {b:?})"),
            Node::Div(a, b) => write!(f, "({a:?} / {b:?})"),
            Node::Neg(a) => write!(f, "(-{a:?})"),
            Node::Pow(a, n) => write!(f, "{a:?}^{n}"),
            Node::Sqrt(a) => write!(f, "sqrt({a:?})"),
            Node::Abs(a) => write!(f, "abs({a:?})"),
            Node::Sign(a) => write!(f, "sign({a:?})"),
            Node::Floor(a) => write!(f, "floor({a:?})"),
            Node::Sin(a) => write!(f, "sin({a:?})"),
            Node::Cos(a) => write!(f, "cos({a:?})"),
            Node::Acos(a) => write!(f, "acos({a:?})"),
            Node::Min(a, b) => write!(f, "min({a:?}, {b:?})"),
            Node::Max(a, b) => write!(f, "max({a:?}, {b:?})"),
            Node::IfLessEq(a, b, t, e) => {
                write!(f, "if({a:?} <= {b:?}; {t:?}; {e:?})")
            }
        }
    }
}

fn node(n: Node) -> Expr {
    Expr(Arc::new(n))
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        node(Node::Const(value))
    }

    pub fn symbol(sym: Symbol) -> Self {
        node(Node::Sym(sym))
    }

    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    pub fn one() -> Self {
        Self::constant(1.0)
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    pub(crate) fn node_ptr(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    /// Returns the constant value if this node is a literal.
    pub fn as_const(&self) -> Option<f64> {
        match *self.0 {
            Node::Const(c) => Some(c),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        matches!(*self.0, Node::Const(c) if c == 0.0)
    }

    fn is_one(&self) -> bool {
        matches!(*self.0, Node::Const(c) if c == 1.0)
    }

    pub fn sqrt(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.sqrt()),
            None => node(Node::Sqrt(self.clone())),
        }
    }

    pub fn abs(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.abs()),
            None => node(Node::Abs(self.clone())),
        }
    }

    pub fn signum(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(if c == 0.0 { 0.0 } else { c.signum() }),
            None => node(Node::Sign(self.clone())),
        }
    }

    pub fn floor(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.floor()),
            None => node(Node::Floor(self.clone())),
        }
    }

    pub fn sin(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.sin()),
            None => node(Node::Sin(self.clone())),
        }
    }

    pub fn cos(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.cos()),
            None => node(Node::Cos(self.clone())),
        }
    }

    pub fn acos(&self) -> Self {
        match self.as_const() {
            Some(c) => Self::constant(c.clamp(-1.0, 1.0).acos()),
            None => node(Node::Acos(self.clone())),
        }
    }

    pub fn powf(&self, exponent: f64) -> Self {
        if exponent == 1.0 {
            return self.clone();
        }
        if exponent == 0.0 {
            return Self::one();
        }
        match self.as_const() {
            Some(c) => Self::constant(c.powf(exponent)),
            None => node(Node::Pow(self.clone(), exponent)),
        }
    }

    pub fn min(&self, other: &Expr) -> Self {
        match (self.as_const(), other.as_const()) {
            (Some(a), Some(b)) => Self::constant(a.min(b)),
            _ => node(Node::Min(self.clone(), other.clone())),
        }
    }

    pub fn max(&self, other: &Expr) -> Self {
        match (self.as_const(), other.as_const()) {
            (Some(a), Some(b)) => Self::constant(a.max(b)),
            _ => node(Node::Max(self.clone(), other.clone())),
        }
    }

    /// Partial derivative with respect to `sym`.
    pub fn diff(&self, sym: Symbol) -> Self {
        match &*self.0 {
            Node::Const(_) => Self::zero(),
            Node::Sym(s) => {
                if *s == sym {
                    Self::one()
                } else {
                    Self::zero()
                }
            }
            Node::Add(a, b) => a.diff(sym) + b.diff(sym),
            Node::Sub(a, b) => a.diff(sym) - b.diff(sym),
            Node::Mul(a, b) => a.diff(sym) * b.clone() + a.clone() * b.diff(sym),
            Node::Div(a, b) => {
                (a.diff(sym) * b.clone() - a.clone() * b.diff(sym)) / (b.clone() * b.clone())
            }
            Node::Neg(a) => -a.diff(sym),
            Node::Pow(a, n) => Self::constant(*n) * a.powf(n - 1.0) * a.diff(sym),
            Node::Sqrt(a) => a.diff(sym) / (Self::constant(2.0) * a.sqrt()),
            Node::Abs(a) => a.signum() * a.diff(sym),
            // Step functions: flat almost everywhere.
            Node::Sign(_) | Node::Floor(_) => Self::zero(),
            Node::Sin(a) => a.cos() * a.diff(sym),
            Node::Cos(a) => -a.sin() * a.diff(sym),
            Node::Acos(a) => {
                -a.diff(sym) / (Self::one() - a.clone() * a.clone()).sqrt()
            }
            Node::Min(a, b) => if_less_eq(a.clone(), b.clone(), a.diff(sym), b.diff(sym)),
            Node::Max(a, b) => if_less_eq(a.clone(), b.clone(), b.diff(sym), a.diff(sym)),
            Node::IfLessEq(a, b, t, e) => {
                if_less_eq(a.clone(), b.clone(), t.diff(sym), e.diff(sym))
            }
        }
    }

    /// All symbols reachable from this expression.
    pub fn free_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        let mut seen: HashSet<*const Node> = HashSet::new();
        self.collect_symbols(&mut out, &mut seen);
        out
    }

    pub(crate) fn collect_symbols(
        &self,
        out: &mut BTreeSet<Symbol>,
        seen: &mut HashSet<*const Node>,
    ) {
        let ptr = Arc::as_ptr(&self.0);
        if !seen.insert(ptr) {
            return;
        }
        match &*self.0 {
            Node::Const(_) => {}
            Node::Sym(s) => {
                out.insert(*s);
            }
            Node::Add(a, b)
            | Node::Sub(a, b)
            | Node::Mul(a, b)
            | Node::Div(a, b)
            | Node::Min(a, b)
            | Node::Max(a, b) => {
                a.collect_symbols(out, seen);
                b.collect_symbols(out, seen);
            }
            Node::Neg(a)
            | Node::Pow(a, _)
            | Node::Sqrt(a)
            | Node::Abs(a)
            | Node::Sign(a)
            | Node::Floor(a)
            | Node::Sin(a)
            | Node::Cos(a)
            | Node::Acos(a) => a.collect_symbols(out, seen),
            Node::IfLessEq(a, b, t, e) => {
                a.collect_symbols(out, seen);
                b.collect_symbols(out, seen);
                t.collect_symbols(out, seen);
                e.collect_symbols(out, seen);
            }
        }
    }

    /// Direct (uncompiled) evaluation. `values` is indexed by symbol id.
    ///
    /// Intended for tests and one-off checks; the hot path goes through
    /// [`crate::compile::CompiledMatrix`].
    pub fn eval(&self, values: &[f64]) -> f64 {
        match &*self.0 {
            Node::Const(c) => *c,
            Node::Sym(s) => values[s.index()],
            Node::Add(a, b) => a.eval(values) + b.eval(values),
            Node::Sub(a, b) => a.eval(values) - b.eval(values),
            Node::Mul(a, b) => a.eval(values) * b.eval(values),
            Node::Div(a, b) => a.eval(values) / b.eval(values),
            Node::Neg(a) => -a.eval(values),
            Node::Pow(a, n) => a.eval(values).powf(*n),
            Node::Sqrt(a) => a.eval(values).sqrt(),
            Node::Abs(a) => a.eval(values).abs(),
            Node::Sign(a) => {
                let v = a.eval(values);
                if v == 0.0 {
                    0.0
                } else {
                    v.signum()
                }
            }
            Node::Floor(a) => a.eval(values).floor(),
            Node::Sin(a) => a.eval(values).sin(),
            Node::Cos(a) => a.eval(values).cos(),
            // Clamped like the compiled tape, so rounding past +-1 stays
            // finite on both evaluation paths.
            Node::Acos(a) => a.eval(values).clamp(-1.0, 1.0).acos(),
            Node::Min(a, b) => a.eval(values).min(b.eval(values)),
            Node::Max(a, b) => a.eval(values).max(b.eval(values)),
            Node::IfLessEq(a, b, t, e) => {
                if a.eval(values) <= b.eval(values) {
                    t.eval(values)
                } else {
                    e.eval(values)
                }
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        if self.is_zero() {
            return rhs;
        }
        if rhs.is_zero() {
            return self;
        }
        match (self.as_const(), rhs.as_const()) {
            (Some(a), Some(b)) => Expr::constant(a + b),
            _ => node(Node::Add(self, rhs)),
        }
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        if rhs.is_zero() {
            return self;
        }
        if self.is_zero() {
            return -rhs;
        }
        match (self.as_const(), rhs.as_const()) {
            (Some(a), Some(b)) => Expr::constant(a - b),
            _ => node(Node::Sub(self, rhs)),
        }
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        if self.is_zero() || rhs.is_zero() {
            return Expr::zero();
        }
        if self.is_one() {
            return rhs;
        }
        if rhs.is_one() {
            return self;
        }
        match (self.as_const(), rhs.as_const()) {
            (Some(a), Some(b)) => Expr::constant(a * b),
            _ => node(Node::Mul(self, rhs)),
        }
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        if rhs.is_one() {
            return self;
        }
        match (self.as_const(), rhs.as_const()) {
            (Some(a), Some(b)) => Expr::constant(a / b),
            _ => node(Node::Div(self, rhs)),
        }
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        match self.as_const() {
            Some(c) => Expr::constant(-c),
            None => node(Node::Neg(self)),
        }
    }
}

impl Add<f64> for Expr {
    type Output = Expr;
    fn add(self, rhs: f64) -> Expr {
        self + Expr::constant(rhs)
    }
}

impl Sub<f64> for Expr {
    type Output = Expr;
    fn sub(self, rhs: f64) -> Expr {
        self - Expr::constant(rhs)
    }
}

impl Mul<f64> for Expr {
    type Output = Expr;
    fn mul(self, rhs: f64) -> Expr {
        self * Expr::constant(rhs)
    }
}

impl Div<f64> for Expr {
    type Output = Expr;
    fn div(self, rhs: f64) -> Expr {
        self / Expr::constant(rhs)
    }
}

/// `if a <= b { then } else { otherwise }`.
pub fn if_less_eq(a: Expr, b: Expr, then: Expr, otherwise: Expr) -> Expr {
    if let (Some(a), Some(b)) = (a.as_const(), b.as_const()) {
        return if a <= b { then } else { otherwise };
    }
    node(Node::IfLessEq(a, b, then, otherwise))
}

/// `if a > b { then } else { otherwise }`.
pub fn if_greater(a: Expr, b: Expr, then: Expr, otherwise: Expr) -> Expr {
    if_less_eq(a, b, otherwise, then)
}

/// `if a >= b { then } else { otherwise }`.
pub fn if_greater_eq(a: Expr, b: Expr, then: Expr, otherwise: Expr) -> Expr {
    if_less_eq(b, a, then, otherwise)
}

/// `if a > 0 { then } else { otherwise }`.
pub fn if_greater_zero(a: Expr, then: Expr, otherwise: Expr) -> Expr {
    if_less_eq(a, Expr::zero(), otherwise, then)
}

/// Division that evaluates to zero when the denominator is (near) zero.
pub fn save_division(numerator: Expr, denominator: Expr) -> Expr {
    if_less_eq(
        denominator.abs(),
        Expr::constant(1e-12),
        Expr::zero(),
        numerator / denominator,
    )
}

/// Jacobian of an expression stack: `out[i][j] = d exprs[i] / d syms[j]`.
pub fn jacobian(exprs: &[Expr], syms: &[Symbol]) -> Vec<Vec<Expr>> {
    exprs
        .iter()
        .map(|e| syms.iter().map(|&s| e.diff(s)).collect())
        .collect()
}
