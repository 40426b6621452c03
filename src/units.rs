//! Physical units with a scale relative to SI base units and integer dimension exponents.
//!
//! Only the small set of units that appear in cell biology models is supported. Units are
//! parsed from strings such as `"uM"`, `"um^2/s"`, `"1/(uM*s)"` or `"molecule/um**2"`.
use crate::error::UnitError;
use std::fmt;
use std::ops::{Div, Mul};

/// Avogadro's number, used to convert molecule counts to moles.
pub const AVOGADRO: f64 = 6.02214076e23;

const BASE_SYMBOLS: [&str; 6] = ["m", "s", "mol", "kg", "A", "K"];
const BASE_NAMES: [&str; 6] = ["length", "time", "substance", "mass", "current", "temperature"];

/// Exponents of the six base dimensions `[length]`, `[time]`, `[substance]`, `[mass]`,
/// `[current]` and `[temperature]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i32; 6]);

impl Dimension {
    pub const fn dimensionless() -> Self {
        Self([0; 6])
    }

    pub const fn length() -> Self {
        Self([1, 0, 0, 0, 0, 0])
    }

    pub const fn time() -> Self {
        Self([0, 1, 0, 0, 0, 0])
    }

    pub const fn substance() -> Self {
        Self([0, 0, 1, 0, 0, 0])
    }

    pub const fn mass() -> Self {
        Self([0, 0, 0, 1, 0, 0])
    }

    pub fn exponents(&self) -> &[i32; 6] {
        &self.0
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| *e == 0)
    }

    pub fn powi(&self, n: i32) -> Self {
        Self(self.0.map(|e| e * n))
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, rhs: Self) -> Self::Output {
        let mut exponents = self.0;
        for (e, r) in exponents.iter_mut().zip(rhs.0) {
            *e += r;
        }
        Dimension(exponents)
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.powi(-1)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "[dimensionless]");
        }
        let mut first = true;
        for (name, e) in BASE_NAMES.iter().zip(self.0) {
            if e == 0 {
                continue;
            }
            if !first {
                write!(f, " * ")?;
            }
            first = false;
            if e == 1 {
                write!(f, "[{}]", name)?;
            } else {
                write!(f, "[{}]^{}", name, e)?;
            }
        }
        Ok(())
    }
}

/// A physical unit: `scale` times the SI base units raised to the exponents of `dimension`.
///
/// For example, `uM` is stored as scale `1e-3` with dimension `[substance] * [length]^-3`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Unit {
    scale: f64,
    dimension: Dimension,
}

impl Unit {
    pub const fn new(scale: f64, dimension: Dimension) -> Self {
        Self { scale, dimension }
    }

    pub const fn dimensionless() -> Self {
        Self::new(1.0, Dimension::dimensionless())
    }

    /// Parses a unit expression.
    pub fn parse(expr: &str) -> Result<Self, UnitError> {
        UnitParser::new(expr).parse()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dimension.is_dimensionless()
    }

    /// Whether both units measure the same physical quantity, regardless of scale.
    pub fn is_dimensionally(&self, other: &Unit) -> bool {
        self.dimension == other.dimension
    }

    /// Checks that the unit has the dimension given by a unit expression, e.g. `"m^2/s"`.
    pub fn check_dimension(&self, expected: &str) -> Result<(), UnitError> {
        let expected = Unit::parse(expected)?;
        if self.is_dimensionally(&expected) {
            Ok(())
        } else {
            Err(UnitError::Incompatible {
                from: self.dimension.to_string(),
                to: expected.dimension.to_string(),
            })
        }
    }

    pub fn powi(&self, n: i32) -> Self {
        Self::new(self.scale.powi(n), self.dimension.powi(n))
    }

    /// The square root of the unit, if every dimension exponent is even.
    pub fn sqrt(&self) -> Option<Self> {
        if self.dimension.0.iter().all(|e| e % 2 == 0) {
            Some(Self::new(self.scale.sqrt(), Dimension(self.dimension.0.map(|e| e / 2))))
        } else {
            None
        }
    }

    /// The factor `c` such that a magnitude `x` in `self` equals `c * x` in `target`.
    pub fn conversion_factor_to(&self, target: &Unit) -> Result<f64, UnitError> {
        if self.is_dimensionally(target) {
            Ok(self.scale / target.scale)
        } else {
            Err(UnitError::Incompatible {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

impl Default for Unit {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl Mul for Unit {
    type Output = Unit;

    fn mul(self, rhs: Self) -> Self::Output {
        Unit::new(self.scale * rhs.scale, self.dimension * rhs.dimension)
    }
}

impl Div for Unit {
    type Output = Unit;

    fn div(self, rhs: Self) -> Self::Output {
        Unit::new(self.scale / rhs.scale, self.dimension / rhs.dimension)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scale)?;
        for (symbol, e) in BASE_SYMBOLS.iter().zip(self.dimension.0) {
            match e {
                0 => {}
                1 => write!(f, " {}", symbol)?,
                e => write!(f, " {}^{}", symbol, e)?,
            }
        }
        Ok(())
    }
}

fn prefix_scale(prefix: char) -> Option<f64> {
    match prefix {
        'p' => Some(1e-12),
        'n' => Some(1e-9),
        'u' | 'µ' | 'μ' => Some(1e-6),
        'm' => Some(1e-3),
        'c' => Some(1e-2),
        'd' => Some(1e-1),
        'k' => Some(1e3),
        _ => None,
    }
}

fn base_unit(symbol: &str) -> Option<Unit> {
    let length = Dimension::length();
    let unit = match symbol {
        "m" | "meter" | "metre" => Unit::new(1.0, length),
        "s" | "sec" | "second" => Unit::new(1.0, Dimension::time()),
        "min" | "minute" => Unit::new(60.0, Dimension::time()),
        "hr" | "h" | "hour" => Unit::new(3600.0, Dimension::time()),
        "mol" | "mole" => Unit::new(1.0, Dimension::substance()),
        "molecule" | "molecules" => Unit::new(1.0 / AVOGADRO, Dimension::substance()),
        "g" | "gram" => Unit::new(1e-3, Dimension::mass()),
        "L" | "l" | "liter" | "litre" => Unit::new(1e-3, length.powi(3)),
        "M" | "molar" => Unit::new(1e3, Dimension::substance() / length.powi(3)),
        "A" | "ampere" => Unit::new(1.0, Dimension([0, 0, 0, 0, 1, 0])),
        "K" | "kelvin" => Unit::new(1.0, Dimension([0, 0, 0, 0, 0, 1])),
        "dimensionless" => Unit::dimensionless(),
        _ => return None,
    };
    Some(unit)
}

/// Resolves an identifier as a base unit, or as an SI prefix followed by a base unit.
fn resolve_symbol(symbol: &str) -> Result<Unit, UnitError> {
    if let Some(unit) = base_unit(symbol) {
        return Ok(unit);
    }
    let mut chars = symbol.chars();
    if let Some(prefix) = chars.next() {
        if let (Some(scale), Some(base)) = (prefix_scale(prefix), base_unit(chars.as_str())) {
            return Ok(Unit::new(scale * base.scale, base.dimension));
        }
    }
    Err(UnitError::UnknownUnit(symbol.to_string()))
}

struct UnitParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> UnitParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> UnitError {
        UnitError::Malformed {
            expr: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Unit, UnitError> {
        self.skip_whitespace();
        if self.peek().is_none() {
            return Err(self.error("empty unit expression"));
        }
        let unit = self.product()?;
        self.skip_whitespace();
        match self.peek() {
            None => Ok(unit),
            Some(c) => Err(self.error(format!("unexpected character `{}`", c))),
        }
    }

    // product := power (('*' | '/' | '·') power)*
    fn product(&mut self) -> Result<Unit, UnitError> {
        let mut unit = self.power()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('*') if self.chars.get(self.pos + 1) != Some(&'*') => {
                    self.pos += 1;
                    unit = unit * self.power()?;
                }
                Some('·') => {
                    self.pos += 1;
                    unit = unit * self.power()?;
                }
                Some('/') => {
                    self.pos += 1;
                    unit = unit / self.power()?;
                }
                _ => return Ok(unit),
            }
        }
    }

    // power := atom (('^' | '**') integer)?
    fn power(&mut self) -> Result<Unit, UnitError> {
        let base = self.atom()?;
        self.skip_whitespace();
        let has_exponent = match (self.peek(), self.chars.get(self.pos + 1)) {
            (Some('^'), _) => {
                self.pos += 1;
                true
            }
            (Some('*'), Some('*')) => {
                self.pos += 2;
                true
            }
            _ => false,
        };
        if has_exponent {
            let exponent = self.integer()?;
            Ok(base.powi(exponent))
        } else {
            Ok(base)
        }
    }

    fn integer(&mut self) -> Result<i32, UnitError> {
        self.skip_whitespace();
        let parenthesized = self.peek() == Some('(');
        if parenthesized {
            self.pos += 1;
        }
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text
            .parse::<i32>()
            .map_err(|_| self.error(format!("invalid integer exponent `{}`", text)))?;
        if parenthesized {
            if self.peek() != Some(')') {
                return Err(self.error("missing `)` after exponent"));
            }
            self.pos += 1;
        }
        Ok(value)
    }

    fn atom(&mut self) -> Result<Unit, UnitError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let unit = self.product()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error("missing `)`"));
                }
                self.pos += 1;
                Ok(unit)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .map_or(false, |c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                let scale = text
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("invalid number `{}`", text)))?;
                Ok(Unit::new(scale, Dimension::dimensionless()))
            }
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while self.peek().map_or(false, |c| c.is_alphabetic() || c == '_') {
                    self.pos += 1;
                }
                let symbol: String = self.chars[start..self.pos].iter().collect();
                resolve_symbol(&symbol)
            }
            Some(c) => Err(self.error(format!("unexpected character `{}`", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}
