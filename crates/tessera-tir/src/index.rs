//! Integer index expressions used for buffer accesses, iterator bindings and
//! block predicates.
//!
//! Index expressions are deliberately small: constants, variables, addition,
//! scaling by a constant, and floor division/modulo by a positive constant.
//! This is enough to describe every loop transformation the schedule performs
//! (split, fuse, reorder) while keeping region analysis decidable.

use std::collections::BTreeMap;
use std::fmt;

use crate::ir::LoopId;

/// A variable referenced by an index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    /// The i-th iterator of the enclosing block.
    Iter(usize),
    /// The induction variable of a loop.
    Loop(LoopId),
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Iter(index) => write!(f, "v{index}"),
            Var::Loop(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexExpr {
    Const(i64),
    Var(Var),
    Add(Box<IndexExpr>, Box<IndexExpr>),
    Mul(Box<IndexExpr>, i64),
    FloorDiv(Box<IndexExpr>, i64),
    FloorMod(Box<IndexExpr>, i64),
}

/// Shorthand for the i-th block iterator.
pub fn iv(index: usize) -> IndexExpr {
    IndexExpr::Var(Var::Iter(index))
}

/// Shorthand for a loop induction variable.
pub fn lv(id: LoopId) -> IndexExpr {
    IndexExpr::Var(Var::Loop(id))
}

impl IndexExpr {
    pub fn constant(value: i64) -> Self {
        IndexExpr::Const(value)
    }

    pub fn add(self, other: IndexExpr) -> Self {
        match (&self, &other) {
            (IndexExpr::Const(0), _) => other,
            (_, IndexExpr::Const(0)) => self,
            (IndexExpr::Const(a), IndexExpr::Const(b)) => IndexExpr::Const(a + b),
            _ => IndexExpr::Add(Box::new(self), Box::new(other)),
        }
    }

    pub fn scale(self, factor: i64) -> Self {
        match (&self, factor) {
            (_, 0) => IndexExpr::Const(0),
            (_, 1) => self,
            (IndexExpr::Const(value), _) => IndexExpr::Const(value * factor),
            _ => IndexExpr::Mul(Box::new(self), factor),
        }
    }

    pub fn floordiv(self, divisor: i64) -> Self {
        debug_assert!(divisor > 0, "floordiv divisor must be positive");
        match (&self, divisor) {
            (_, 1) => self,
            (IndexExpr::Const(value), _) => IndexExpr::Const(value.div_euclid(divisor)),
            _ => IndexExpr::FloorDiv(Box::new(self), divisor),
        }
    }

    pub fn floormod(self, divisor: i64) -> Self {
        debug_assert!(divisor > 0, "floormod divisor must be positive");
        match (&self, divisor) {
            (_, 1) => IndexExpr::Const(0),
            (IndexExpr::Const(value), _) => IndexExpr::Const(value.rem_euclid(divisor)),
            _ => IndexExpr::FloorMod(Box::new(self), divisor),
        }
    }

    pub fn as_var(&self) -> Option<Var> {
        match self {
            IndexExpr::Var(var) => Some(*var),
            _ => None,
        }
    }

    pub fn uses(&self, var: Var) -> bool {
        match self {
            IndexExpr::Const(_) => false,
            IndexExpr::Var(v) => *v == var,
            IndexExpr::Add(lhs, rhs) => lhs.uses(var) || rhs.uses(var),
            IndexExpr::Mul(inner, _)
            | IndexExpr::FloorDiv(inner, _)
            | IndexExpr::FloorMod(inner, _) => inner.uses(var),
        }
    }

    /// Replaces variables for which `f` returns a replacement.
    pub fn substitute<F>(&self, f: &mut F) -> IndexExpr
    where
        F: FnMut(Var) -> Option<IndexExpr>,
    {
        match self {
            IndexExpr::Const(value) => IndexExpr::Const(*value),
            IndexExpr::Var(var) => f(*var).unwrap_or(IndexExpr::Var(*var)),
            IndexExpr::Add(lhs, rhs) => lhs.substitute(f).add(rhs.substitute(f)),
            IndexExpr::Mul(inner, factor) => inner.substitute(f).scale(*factor),
            IndexExpr::FloorDiv(inner, divisor) => inner.substitute(f).floordiv(*divisor),
            IndexExpr::FloorMod(inner, divisor) => inner.substitute(f).floormod(*divisor),
        }
    }

    /// Returns the affine form `sum(coeff * var) + constant` when the
    /// expression has no division or modulo.
    pub fn linear(&self) -> Option<LinearForm> {
        match self {
            IndexExpr::Const(value) => Some(LinearForm::constant(*value)),
            IndexExpr::Var(var) => Some(LinearForm::var(*var)),
            IndexExpr::Add(lhs, rhs) => {
                let mut form = lhs.linear()?;
                form.accumulate(&rhs.linear()?, 1);
                Some(form)
            }
            IndexExpr::Mul(inner, factor) => {
                let mut form = LinearForm::constant(0);
                form.accumulate(&inner.linear()?, *factor);
                Some(form)
            }
            IndexExpr::FloorDiv(..) | IndexExpr::FloorMod(..) => None,
        }
    }

    /// Inclusive value range given the inclusive range of every variable.
    pub fn bounds<R>(&self, range: &R) -> Option<(i64, i64)>
    where
        R: Fn(Var) -> Option<(i64, i64)>,
    {
        match self {
            IndexExpr::Const(value) => Some((*value, *value)),
            IndexExpr::Var(var) => range(*var),
            IndexExpr::Add(lhs, rhs) => {
                let (a, b) = lhs.bounds(range)?;
                let (c, d) = rhs.bounds(range)?;
                Some((a + c, b + d))
            }
            IndexExpr::Mul(inner, factor) => {
                let (lo, hi) = inner.bounds(range)?;
                let (x, y) = (lo * factor, hi * factor);
                Some((x.min(y), x.max(y)))
            }
            IndexExpr::FloorDiv(inner, divisor) => {
                let (lo, hi) = inner.bounds(range)?;
                Some((lo.div_euclid(*divisor), hi.div_euclid(*divisor)))
            }
            IndexExpr::FloorMod(inner, divisor) => {
                let (lo, hi) = inner.bounds(range)?;
                if lo.div_euclid(*divisor) == hi.div_euclid(*divisor) {
                    Some((lo.rem_euclid(*divisor), hi.rem_euclid(*divisor)))
                } else {
                    Some((0, divisor - 1))
                }
            }
        }
    }

    /// Canonicalizes affine sub-expressions and removes divisions and moduli
    /// that the variable ranges prove redundant.
    pub fn simplify<R>(&self, range: &R) -> IndexExpr
    where
        R: Fn(Var) -> Option<(i64, i64)>,
    {
        if let Some(form) = self.linear() {
            return form.to_expr();
        }
        match self {
            IndexExpr::Const(_) | IndexExpr::Var(_) => self.clone(),
            IndexExpr::Add(lhs, rhs) => {
                let sum = lhs.simplify(range).add(rhs.simplify(range));
                match sum.linear() {
                    Some(form) => form.to_expr(),
                    None => sum,
                }
            }
            IndexExpr::Mul(inner, factor) => inner.simplify(range).scale(*factor),
            IndexExpr::FloorDiv(inner, divisor) => {
                let inner = inner.simplify(range);
                simplify_div(inner, *divisor, range)
            }
            IndexExpr::FloorMod(inner, divisor) => {
                let inner = inner.simplify(range);
                simplify_mod(inner, *divisor, range)
            }
        }
    }
}

fn simplify_div<R>(inner: IndexExpr, divisor: i64, range: &R) -> IndexExpr
where
    R: Fn(Var) -> Option<(i64, i64)>,
{
    if let IndexExpr::FloorDiv(nested, first) = &inner {
        return simplify_div((**nested).clone(), first * divisor, range);
    }
    if let Some(form) = inner.linear() {
        let (quotient, remainder) = form.split_by(divisor);
        if let Some((lo, hi)) = remainder.to_expr().bounds(range) {
            if lo >= 0 && hi < divisor {
                return quotient.to_expr();
            }
        }
    }
    match inner.bounds(range) {
        Some((lo, hi)) if lo >= 0 && hi < divisor => IndexExpr::Const(0),
        _ => inner.floordiv(divisor),
    }
}

fn simplify_mod<R>(inner: IndexExpr, divisor: i64, range: &R) -> IndexExpr
where
    R: Fn(Var) -> Option<(i64, i64)>,
{
    if let Some(form) = inner.linear() {
        let (_, remainder) = form.split_by(divisor);
        if let Some((lo, hi)) = remainder.to_expr().bounds(range) {
            if lo >= 0 && hi < divisor {
                return remainder.to_expr();
            }
        }
    }
    match inner.bounds(range) {
        Some((lo, hi)) if lo >= 0 && hi < divisor => inner,
        _ => inner.floormod(divisor),
    }
}

/// Affine form of an index expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearForm {
    pub terms: BTreeMap<Var, i64>,
    pub constant: i64,
}

impl LinearForm {
    pub fn constant(value: i64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(var: Var) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(var, 1);
        Self { terms, constant: 0 }
    }

    pub fn coeff(&self, var: Var) -> i64 {
        self.terms.get(&var).copied().unwrap_or(0)
    }

    fn accumulate(&mut self, other: &LinearForm, factor: i64) {
        for (var, coeff) in &other.terms {
            let entry = self.terms.entry(*var).or_insert(0);
            *entry += coeff * factor;
        }
        self.terms.retain(|_, coeff| *coeff != 0);
        self.constant += other.constant * factor;
    }

    /// Splits into `(q, r)` with `self == q * divisor + r`, where `q` keeps
    /// every term whose coefficient is a multiple of `divisor`.
    fn split_by(&self, divisor: i64) -> (LinearForm, LinearForm) {
        let mut quotient = LinearForm::constant(self.constant.div_euclid(divisor));
        let mut remainder = LinearForm::constant(self.constant.rem_euclid(divisor));
        for (var, coeff) in &self.terms {
            if coeff % divisor == 0 {
                quotient.terms.insert(*var, coeff / divisor);
            } else {
                remainder.terms.insert(*var, *coeff);
            }
        }
        (quotient, remainder)
    }

    pub fn to_expr(&self) -> IndexExpr {
        let mut expr = IndexExpr::Const(0);
        for (var, coeff) in &self.terms {
            expr = expr.add(IndexExpr::Var(*var).scale(*coeff));
        }
        expr.add(IndexExpr::Const(self.constant))
    }
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexExpr::Const(value) => write!(f, "{value}"),
            IndexExpr::Var(var) => write!(f, "{var}"),
            IndexExpr::Add(lhs, rhs) => write!(f, "{lhs} + {rhs}"),
            IndexExpr::Mul(inner, factor) => match inner.as_ref() {
                IndexExpr::Add(..) => write!(f, "({inner}) * {factor}"),
                _ => write!(f, "{inner} * {factor}"),
            },
            IndexExpr::FloorDiv(inner, divisor) => write!(f, "({inner}) // {divisor}"),
            IndexExpr::FloorMod(inner, divisor) => write!(f, "({inner}) % {divisor}"),
        }
    }
}
