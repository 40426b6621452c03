//! Symbolic rate expressions.
//!
//! Reaction rates are small closed-form expressions over species concentrations and
//! parameters. [`Expr`] supports the operations needed to compile them into fluxes:
//! parsing, substitution, symbolic differentiation, simplification, unit derivation and
//! compilation into a tree that is evaluated against a slice of values.
use crate::error::ExprError;
use crate::units::Unit;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

mod parse;

/// Elementary functions available in rate expressions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Func {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Abs,
    Heaviside,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "exp" => Func::Exp,
            "log" | "ln" => Func::Log,
            "sqrt" => Func::Sqrt,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tanh" => Func::Tanh,
            "abs" | "Abs" => Func::Abs,
            "heaviside" | "Heaviside" => Func::Heaviside,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tanh => "tanh",
            Func::Abs => "abs",
            Func::Heaviside => "heaviside",
        }
    }

    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
            Func::Abs => x.abs(),
            Func::Heaviside => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    0.0
                } else {
                    0.5
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Sym(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Func(Func, Box<Expr>),
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Num(value)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym(name.into())
    }

    pub fn parse(input: &str) -> Result<Self, ExprError> {
        parse::Parser::new(input)?.parse()
    }

    /// Product of the given factors, or `1` if there are none.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        factors
            .into_iter()
            .fold(None, |acc: Option<Expr>, factor| match acc {
                None => Some(factor),
                Some(acc) => Some(acc * factor),
            })
            .unwrap_or(Expr::Num(1.0))
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.visit_symbols(&mut |s| {
            symbols.insert(s.to_string());
        });
        symbols
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        let mut found = false;
        self.visit_symbols(&mut |s| found |= s == name);
        found
    }

    fn visit_symbols(&self, visitor: &mut impl FnMut(&str)) {
        match self {
            Expr::Num(_) => {}
            Expr::Sym(s) => visitor(s),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Pow(a, b) => {
                a.visit_symbols(visitor);
                b.visit_symbols(visitor);
            }
            Expr::Neg(a) | Expr::Func(_, a) => a.visit_symbols(visitor),
        }
    }

    /// Replaces every symbol for which `replacement` returns an expression.
    pub fn substitute(&self, replacement: &impl Fn(&str) -> Option<Expr>) -> Expr {
        self.map_symbols(&mut |s| replacement(s).unwrap_or_else(|| Expr::Sym(s.to_string())))
    }

    /// Renames symbols according to `names`. Symbols not in the map are kept.
    pub fn rename(&self, names: &BTreeMap<String, String>) -> Expr {
        self.substitute(&|s| names.get(s).map(|n| Expr::Sym(n.clone())))
    }

    fn map_symbols(&self, f: &mut impl FnMut(&str) -> Expr) -> Expr {
        match self {
            Expr::Num(v) => Expr::Num(*v),
            Expr::Sym(s) => f(s),
            Expr::Add(a, b) => Expr::Add(Box::new(a.map_symbols(f)), Box::new(b.map_symbols(f))),
            Expr::Sub(a, b) => Expr::Sub(Box::new(a.map_symbols(f)), Box::new(b.map_symbols(f))),
            Expr::Mul(a, b) => Expr::Mul(Box::new(a.map_symbols(f)), Box::new(b.map_symbols(f))),
            Expr::Div(a, b) => Expr::Div(Box::new(a.map_symbols(f)), Box::new(b.map_symbols(f))),
            Expr::Pow(a, b) => Expr::Pow(Box::new(a.map_symbols(f)), Box::new(b.map_symbols(f))),
            Expr::Neg(a) => Expr::Neg(Box::new(a.map_symbols(f))),
            Expr::Func(func, a) => Expr::Func(*func, Box::new(a.map_symbols(f))),
        }
    }

    /// Constant folding and elimination of additive and multiplicative identities.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Num(v) => Expr::Num(*v),
            Expr::Sym(s) => Expr::Sym(s.clone()),
            Expr::Add(a, b) => add(a.simplify(), b.simplify()),
            Expr::Sub(a, b) => sub(a.simplify(), b.simplify()),
            Expr::Mul(a, b) => mul(a.simplify(), b.simplify()),
            Expr::Div(a, b) => div(a.simplify(), b.simplify()),
            Expr::Pow(a, b) => pow(a.simplify(), b.simplify()),
            Expr::Neg(a) => neg(a.simplify()),
            Expr::Func(func, a) => apply(*func, a.simplify()),
        }
    }

    /// Whether the expression simplifies to the constant zero.
    pub fn is_zero(&self) -> bool {
        matches!(self.simplify(), Expr::Num(v) if v == 0.0)
    }

    /// Symbolic derivative with respect to `var`, simplified.
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Num(_) => Expr::Num(0.0),
            Expr::Sym(s) => Expr::Num(if s == var { 1.0 } else { 0.0 }),
            Expr::Add(a, b) => add(a.diff(var), b.diff(var)),
            Expr::Sub(a, b) => sub(a.diff(var), b.diff(var)),
            Expr::Mul(a, b) => add(
                mul(a.diff(var), b.simplify()),
                mul(a.simplify(), b.diff(var)),
            ),
            Expr::Div(a, b) => {
                let (a_s, b_s) = (a.simplify(), b.simplify());
                div(
                    sub(mul(a.diff(var), b_s.clone()), mul(a_s, b.diff(var))),
                    pow(b_s, Expr::Num(2.0)),
                )
            }
            Expr::Pow(a, b) => {
                let (a_s, b_s) = (a.simplify(), b.simplify());
                if b.contains_symbol(var) {
                    // d(a^b) = a^b * (b' ln(a) + b a' / a)
                    mul(
                        pow(a_s.clone(), b_s.clone()),
                        add(
                            mul(b.diff(var), apply(Func::Log, a_s.clone())),
                            div(mul(b_s, a.diff(var)), a_s),
                        ),
                    )
                } else {
                    mul(
                        mul(b_s.clone(), pow(a_s, sub(b_s, Expr::Num(1.0)))),
                        a.diff(var),
                    )
                }
            }
            Expr::Neg(a) => neg(a.diff(var)),
            Expr::Func(func, a) => {
                let a_s = a.simplify();
                let outer = match func {
                    Func::Exp => apply(Func::Exp, a_s),
                    Func::Log => div(Expr::Num(1.0), a_s),
                    Func::Sqrt => div(Expr::Num(1.0), mul(Expr::Num(2.0), apply(Func::Sqrt, a_s))),
                    Func::Sin => apply(Func::Cos, a_s),
                    Func::Cos => neg(apply(Func::Sin, a_s)),
                    Func::Tanh => sub(Expr::Num(1.0), pow(apply(Func::Tanh, a_s), Expr::Num(2.0))),
                    Func::Abs => div(a_s.clone(), apply(Func::Abs, a_s)),
                    // The distributional derivative is not representable, and is zero almost everywhere
                    Func::Heaviside => Expr::Num(0.0),
                };
                mul(outer, a.diff(var))
            }
        }
    }

    /// Whether the second derivative with respect to `var` vanishes identically.
    pub fn is_linear_in(&self, var: &str) -> bool {
        self.diff(var).diff(var).is_zero()
    }

    /// Evaluates the expression, looking up symbol values in `env`.
    pub fn eval(&self, env: &impl Fn(&str) -> Option<f64>) -> Result<f64, ExprError> {
        let value = match self {
            Expr::Num(v) => *v,
            Expr::Sym(s) => env(s).ok_or_else(|| ExprError::UnknownSymbol(s.clone()))?,
            Expr::Add(a, b) => a.eval(env)? + b.eval(env)?,
            Expr::Sub(a, b) => a.eval(env)? - b.eval(env)?,
            Expr::Mul(a, b) => a.eval(env)? * b.eval(env)?,
            Expr::Div(a, b) => a.eval(env)? / b.eval(env)?,
            Expr::Pow(a, b) => a.eval(env)?.powf(b.eval(env)?),
            Expr::Neg(a) => -a.eval(env)?,
            Expr::Func(func, a) => func.apply(a.eval(env)?),
        };
        Ok(value)
    }

    /// Compiles the expression into a tree whose symbols are indices into `symbols`.
    pub fn compile<S: AsRef<str>>(&self, symbols: &[S]) -> Result<CompiledExpr, ExprError> {
        Ok(CompiledExpr {
            root: self.compile_node(symbols)?,
        })
    }

    fn compile_node<S: AsRef<str>>(&self, symbols: &[S]) -> Result<Node, ExprError> {
        let binary = |a: &Expr, b: &Expr| -> Result<(Box<Node>, Box<Node>), ExprError> {
            Ok((Box::new(a.compile_node(symbols)?), Box::new(b.compile_node(symbols)?)))
        };
        let node = match self {
            Expr::Num(v) => Node::Num(*v),
            Expr::Sym(s) => {
                let index = symbols
                    .iter()
                    .position(|candidate| candidate.as_ref() == s)
                    .ok_or_else(|| ExprError::UnknownSymbol(s.clone()))?;
                Node::Var(index)
            }
            Expr::Add(a, b) => {
                let (a, b) = binary(a, b)?;
                Node::Add(a, b)
            }
            Expr::Sub(a, b) => {
                let (a, b) = binary(a, b)?;
                Node::Sub(a, b)
            }
            Expr::Mul(a, b) => {
                let (a, b) = binary(a, b)?;
                Node::Mul(a, b)
            }
            Expr::Div(a, b) => {
                let (a, b) = binary(a, b)?;
                Node::Div(a, b)
            }
            Expr::Pow(a, b) => {
                let (a, b) = binary(a, b)?;
                match *b {
                    Node::Num(e) if e.fract() == 0.0 && e.abs() <= i32::MAX as f64 => Node::PowI(a, e as i32),
                    b => Node::Pow(a, Box::new(b)),
                }
            }
            Expr::Neg(a) => Node::Neg(Box::new(a.compile_node(symbols)?)),
            Expr::Func(func, a) => Node::Func(*func, Box::new(a.compile_node(symbols)?)),
        };
        Ok(node)
    }

    /// Derives the unit of the expression from the units of its symbols.
    ///
    /// Returns an equivalent expression in which addends are converted to the unit of the
    /// first addend and arguments of elementary functions are converted to pure numbers,
    /// together with the unit of the result. Evaluating the returned expression with each
    /// symbol's magnitude in its own unit gives the magnitude of the result in the returned
    /// unit.
    pub fn with_units(&self, units: &impl Fn(&str) -> Option<Unit>) -> Result<(Expr, Unit), ExprError> {
        match self {
            Expr::Num(v) => Ok((Expr::Num(*v), Unit::dimensionless())),
            Expr::Sym(s) => {
                let unit = units(s).ok_or_else(|| ExprError::UnknownSymbol(s.clone()))?;
                Ok((Expr::Sym(s.clone()), unit))
            }
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                let (a, unit_a) = a.with_units(units)?;
                let (b, unit_b) = b.with_units(units)?;
                let factor = unit_b
                    .conversion_factor_to(&unit_a)
                    .map_err(|_| ExprError::IncompatibleAddends {
                        left: unit_a.to_string(),
                        right: unit_b.to_string(),
                    })?;
                let b = scaled(b, factor);
                let expr = match self {
                    Expr::Add(..) => Expr::Add(Box::new(a), Box::new(b)),
                    _ => Expr::Sub(Box::new(a), Box::new(b)),
                };
                Ok((expr, unit_a))
            }
            Expr::Mul(a, b) => {
                let (a, unit_a) = a.with_units(units)?;
                let (b, unit_b) = b.with_units(units)?;
                Ok((Expr::Mul(Box::new(a), Box::new(b)), unit_a * unit_b))
            }
            Expr::Div(a, b) => {
                let (a, unit_a) = a.with_units(units)?;
                let (b, unit_b) = b.with_units(units)?;
                Ok((Expr::Div(Box::new(a), Box::new(b)), unit_a / unit_b))
            }
            Expr::Pow(a, b) => {
                let (a, unit_a) = a.with_units(units)?;
                let (b, unit_b) = b.with_units(units)?;
                let b = to_pure_number(b, &unit_b, "pow")?;
                if unit_a.is_dimensionless() {
                    let a = scaled(a, unit_a.scale());
                    Ok((Expr::Pow(Box::new(a), Box::new(b)), Unit::dimensionless()))
                } else {
                    match b.simplify() {
                        Expr::Num(e) if e.fract() == 0.0 => {
                            Ok((Expr::Pow(Box::new(a), Box::new(Expr::Num(e))), unit_a.powi(e as i32)))
                        }
                        _ => Err(ExprError::NonIntegerExponent),
                    }
                }
            }
            Expr::Neg(a) => {
                let (a, unit) = a.with_units(units)?;
                Ok((Expr::Neg(Box::new(a)), unit))
            }
            Expr::Func(func, a) => {
                let (a, unit) = a.with_units(units)?;
                match func {
                    // Sign and magnitude do not depend on the unit's scale
                    Func::Abs => Ok((Expr::Func(*func, Box::new(a)), unit)),
                    Func::Heaviside => Ok((Expr::Func(*func, Box::new(a)), Unit::dimensionless())),
                    Func::Sqrt if !unit.is_dimensionless() => {
                        let root = unit.sqrt().ok_or_else(|| ExprError::DimensionedArgument {
                            function: func.name().to_string(),
                            unit: unit.to_string(),
                        })?;
                        Ok((Expr::Func(*func, Box::new(a)), root))
                    }
                    _ => {
                        let a = to_pure_number(a, &unit, func.name())?;
                        Ok((Expr::Func(*func, Box::new(a)), Unit::dimensionless()))
                    }
                }
            }
        }
    }
}

fn scaled(expr: Expr, factor: f64) -> Expr {
    if factor == 1.0 {
        expr
    } else {
        Expr::Mul(Box::new(Expr::Num(factor)), Box::new(expr))
    }
}

fn to_pure_number(expr: Expr, unit: &Unit, function: &str) -> Result<Expr, ExprError> {
    if unit.is_dimensionless() {
        Ok(scaled(expr, unit.scale()))
    } else {
        Err(ExprError::DimensionedArgument {
            function: function.to_string(),
            unit: unit.to_string(),
        })
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x + y),
        (Expr::Num(x), e) | (e, Expr::Num(x)) if x == 0.0 => e,
        (a, Expr::Neg(b)) => sub(a, *b),
        (a, b) => Expr::Add(Box::new(a), Box::new(b)),
    }
}

fn sub(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x - y),
        (e, Expr::Num(y)) if y == 0.0 => e,
        (Expr::Num(x), e) if x == 0.0 => neg(e),
        (a, Expr::Neg(b)) => add(a, *b),
        (a, b) if a == b => Expr::Num(0.0),
        (a, b) => Expr::Sub(Box::new(a), Box::new(b)),
    }
}

fn mul(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x * y),
        (Expr::Num(x), _) | (_, Expr::Num(x)) if x == 0.0 => Expr::Num(0.0),
        (Expr::Num(x), e) | (e, Expr::Num(x)) if x == 1.0 => e,
        (Expr::Num(x), e) | (e, Expr::Num(x)) if x == -1.0 => neg(e),
        (Expr::Num(x), Expr::Mul(c, e)) => match *c {
            Expr::Num(y) => mul(Expr::Num(x * y), *e),
            c => Expr::Mul(Box::new(Expr::Num(x)), Box::new(Expr::Mul(Box::new(c), e))),
        },
        (e, Expr::Num(x)) => mul(Expr::Num(x), e),
        (Expr::Neg(a), b) => neg(mul(*a, b)),
        (a, Expr::Neg(b)) => neg(mul(a, *b)),
        (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
    }
}

fn div(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) if y != 0.0 => Expr::Num(x / y),
        (Expr::Num(x), _) if x == 0.0 => Expr::Num(0.0),
        (e, Expr::Num(y)) if y == 1.0 => e,
        (a, b) => Expr::Div(Box::new(a), Box::new(b)),
    }
}

fn pow(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x.powf(y)),
        (_, Expr::Num(y)) if y == 0.0 => Expr::Num(1.0),
        (e, Expr::Num(y)) if y == 1.0 => e,
        (Expr::Num(x), _) if x == 1.0 => Expr::Num(1.0),
        (a, b) => Expr::Pow(Box::new(a), Box::new(b)),
    }
}

fn neg(a: Expr) -> Expr {
    match a {
        Expr::Num(x) => Expr::Num(-x),
        Expr::Neg(e) => *e,
        e => Expr::Neg(Box::new(e)),
    }
}

fn apply(func: Func, a: Expr) -> Expr {
    match a {
        Expr::Num(x) => Expr::Num(func.apply(x)),
        e => Expr::Func(func, Box::new(e)),
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Self) -> Self::Output {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Self) -> Self::Output {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Self) -> Self::Output {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Self) -> Self::Output {
        Expr::Div(Box::new(self), Box::new(rhs))
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        Expr::Neg(Box::new(self))
    }
}

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) | Expr::Div(..) => 2,
            Expr::Neg(_) => 3,
            Expr::Num(v) if *v < 0.0 => 3,
            Expr::Pow(..) => 4,
            Expr::Num(_) | Expr::Sym(_) | Expr::Func(..) => 5,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{}", v),
            Expr::Sym(s) => write!(f, "{}", s),
            Expr::Add(a, b) => {
                a.fmt_child(f, 1)?;
                write!(f, " + ")?;
                b.fmt_child(f, 1)
            }
            Expr::Sub(a, b) => {
                a.fmt_child(f, 1)?;
                write!(f, " - ")?;
                b.fmt_child(f, 2)
            }
            Expr::Mul(a, b) => {
                a.fmt_child(f, 2)?;
                write!(f, "*")?;
                b.fmt_child(f, 2)
            }
            Expr::Div(a, b) => {
                a.fmt_child(f, 2)?;
                write!(f, "/")?;
                b.fmt_child(f, 3)
            }
            Expr::Pow(a, b) => {
                a.fmt_child(f, 5)?;
                write!(f, "^")?;
                b.fmt_child(f, 4)
            }
            Expr::Neg(a) => {
                write!(f, "-")?;
                a.fmt_child(f, 4)
            }
            Expr::Func(func, a) => write!(f, "{}({})", func.name(), a),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(usize),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, Box<Node>),
    PowI(Box<Node>, i32),
    Neg(Box<Node>),
    Func(Func, Box<Node>),
}

impl Node {
    fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Node::Num(v) => *v,
            Node::Var(i) => values[*i],
            Node::Add(a, b) => a.eval(values) + b.eval(values),
            Node::Sub(a, b) => a.eval(values) - b.eval(values),
            Node::Mul(a, b) => a.eval(values) * b.eval(values),
            Node::Div(a, b) => a.eval(values) / b.eval(values),
            Node::Pow(a, b) => a.eval(values).powf(b.eval(values)),
            Node::PowI(a, n) => a.eval(values).powi(*n),
            Node::Neg(a) => -a.eval(values),
            Node::Func(func, a) => func.apply(a.eval(values)),
        }
    }
}

/// An expression whose symbols have been resolved to positions in a value slice.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    root: Node,
}

impl CompiledExpr {
    /// Evaluates the expression.
    ///
    /// Panics if `values` is shorter than the symbol list the expression was compiled with.
    pub fn eval(&self, values: &[f64]) -> f64 {
        self.root.eval(values)
    }

    /// Whether the expression is the constant zero.
    pub fn is_zero(&self) -> bool {
        self.root == Node::Num(0.0)
    }
}
