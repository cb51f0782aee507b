use std::fmt;
use std::ops;

use crate::index::{IndexExpr, Var};
use crate::ir::{BufferId, DType};

/// A read or write of one buffer element.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub buffer: BufferId,
    pub indices: Vec<IndexExpr>,
}

impl Access {
    pub fn new(buffer: BufferId, indices: Vec<IndexExpr>) -> Self {
        Self { buffer, indices }
    }

    pub fn substitute<F>(&self, f: &mut F) -> Access
    where
        F: FnMut(Var) -> Option<IndexExpr>,
    {
        Access {
            buffer: self.buffer,
            indices: self
                .indices
                .iter()
                .map(|index| index.substitute(f))
                .collect(),
        }
    }

    /// Block iterators used as whole indices, in index order. `None` when an
    /// index is anything other than a plain iterator.
    pub fn plain_iters(&self) -> Option<Vec<usize>> {
        self.indices
            .iter()
            .map(|index| match index.as_var() {
                Some(Var::Iter(i)) => Some(i),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Value computed by a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Load(Access),
    /// An index expression over block iterators used as a value.
    Index(IndexExpr),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`.
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Call to a named operator such as `tir.exp`.
    Call(String, Vec<Expr>),
    Cast(DType, Box<Expr>),
}

impl Expr {
    pub fn load(buffer: BufferId, indices: Vec<IndexExpr>) -> Self {
        Expr::Load(Access::new(buffer, indices))
    }

    pub fn call(op: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(op.into(), args)
    }

    pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Select(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn cast(dtype: DType, value: Expr) -> Self {
        Expr::Cast(dtype, Box::new(value))
    }

    pub fn max(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Max, self, other)
    }

    /// Visits loads in evaluation order.
    pub fn for_each_load<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Access),
    {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Index(_) => {}
            Expr::Load(access) => f(access),
            Expr::Unary(_, value) | Expr::Cast(_, value) => value.for_each_load(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.for_each_load(f);
                rhs.for_each_load(f);
            }
            Expr::Select(cond, then, otherwise) => {
                cond.for_each_load(f);
                then.for_each_load(f);
                otherwise.for_each_load(f);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.for_each_load(f)),
        }
    }

    pub fn loads(&self) -> Vec<&Access> {
        let mut out = Vec::new();
        self.for_each_load(&mut |access| out.push(access));
        out
    }

    /// Rebuilds the expression, replacing each load for which `f` returns a value.
    pub fn replace_loads<F>(&self, f: &mut F) -> Expr
    where
        F: FnMut(&Access) -> Option<Expr>,
    {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Index(_) => self.clone(),
            Expr::Load(access) => f(access).unwrap_or_else(|| self.clone()),
            Expr::Unary(op, value) => Expr::Unary(*op, Box::new(value.replace_loads(f))),
            Expr::Cast(dtype, value) => Expr::Cast(*dtype, Box::new(value.replace_loads(f))),
            Expr::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(lhs.replace_loads(f)),
                Box::new(rhs.replace_loads(f)),
            ),
            Expr::Select(cond, then, otherwise) => Expr::Select(
                Box::new(cond.replace_loads(f)),
                Box::new(then.replace_loads(f)),
                Box::new(otherwise.replace_loads(f)),
            ),
            Expr::Call(op, args) => {
                let args = args.iter().map(|arg| arg.replace_loads(f)).collect();
                Expr::Call(op.clone(), args)
            }
        }
    }

    /// Substitutes index variables in loads and index values.
    pub fn substitute<F>(&self, f: &mut F) -> Expr
    where
        F: FnMut(Var) -> Option<IndexExpr>,
    {
        match self {
            Expr::Int(_) | Expr::Float(_) => self.clone(),
            Expr::Index(index) => Expr::Index(index.substitute(f)),
            Expr::Load(access) => Expr::Load(access.substitute(f)),
            Expr::Unary(op, value) => Expr::Unary(*op, Box::new(value.substitute(f))),
            Expr::Cast(dtype, value) => Expr::Cast(*dtype, Box::new(value.substitute(f))),
            Expr::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(lhs.substitute(f)),
                Box::new(rhs.substitute(f)),
            ),
            Expr::Select(cond, then, otherwise) => Expr::Select(
                Box::new(cond.substitute(f)),
                Box::new(then.substitute(f)),
                Box::new(otherwise.substitute(f)),
            ),
            Expr::Call(op, args) => {
                let args = args.iter().map(|arg| arg.substitute(f)).collect();
                Expr::Call(op.clone(), args)
            }
        }
    }

    pub fn has_select(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Index(_) | Expr::Load(_) => false,
            Expr::Select(..) => true,
            Expr::Call(op, args) => {
                op == "tir.if_then_else" || args.iter().any(Expr::has_select)
            }
            Expr::Unary(_, value) | Expr::Cast(_, value) => value.has_select(),
            Expr::Binary(_, lhs, rhs) => lhs.has_select() || rhs.has_select(),
        }
    }

    pub fn calls_op(&self, name: &str) -> bool {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Index(_) | Expr::Load(_) => false,
            Expr::Call(op, args) => op == name || args.iter().any(|arg| arg.calls_op(name)),
            Expr::Unary(_, value) | Expr::Cast(_, value) => value.calls_op(name),
            Expr::Binary(_, lhs, rhs) => lhs.calls_op(name) || rhs.calls_op(name),
            Expr::Select(cond, then, otherwise) => {
                cond.calls_op(name) || then.calls_op(name) || otherwise.calls_op(name)
            }
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Float(_) => true,
            Expr::Cast(_, value) | Expr::Unary(_, value) => value.is_constant(),
            Expr::Binary(_, lhs, rhs) => lhs.is_constant() && rhs.is_constant(),
            _ => false,
        }
    }

    /// Strips casts around a value.
    pub fn strip_casts(&self) -> &Expr {
        match self {
            Expr::Cast(_, value) => value.strip_casts(),
            _ => self,
        }
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);

/// Commutative reducers supported by reduction blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Prod,
    Max,
    Min,
}

impl ReduceKind {
    fn symbol(self) -> &'static str {
        match self {
            ReduceKind::Sum => "+=",
            ReduceKind::Prod => "*=",
            ReduceKind::Max => "max=",
            ReduceKind::Min => "min=",
        }
    }
}

/// The single store performed by a leaf block.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    pub target: Access,
    pub value: Expr,
    pub reducer: Option<ReduceKind>,
}

impl Store {
    pub fn assign(target: Access, value: Expr) -> Self {
        Self {
            target,
            value,
            reducer: None,
        }
    }

    pub fn reduce(target: Access, reducer: ReduceKind, value: Expr) -> Self {
        Self {
            target,
            value,
            reducer: Some(reducer),
        }
    }

    pub fn operator(&self) -> &'static str {
        self.reducer.map(ReduceKind::symbol).unwrap_or("=")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(value) => write!(f, "{value}"),
            Expr::Float(value) => write!(f, "{value:?}"),
            Expr::Load(access) => {
                write!(f, "{}[", access.buffer)?;
                for (i, index) in access.indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{index}")?;
                }
                write!(f, "]")
            }
            Expr::Index(index) => write!(f, "{index}"),
            Expr::Unary(UnaryOp::Neg, value) => write!(f, "-({value})"),
            Expr::Unary(UnaryOp::Not, value) => write!(f, "!({value})"),
            Expr::Binary(op @ (BinaryOp::Max | BinaryOp::Min), lhs, rhs) => {
                write!(f, "{}({lhs}, {rhs})", op.symbol())
            }
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Select(cond, then, otherwise) => {
                write!(f, "select({cond}, {then}, {otherwise})")
            }
            Expr::Call(op, args) => {
                write!(f, "{op}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Cast(dtype, value) => write!(f, "{dtype}({value})"),
        }
    }
}
