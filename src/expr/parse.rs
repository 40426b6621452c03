//! Tokenizer and recursive-descent parser for rate expressions.
use super::{Expr, Func};
use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone)]
struct SpannedToken {
    token: Token,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<SpannedToken>, ExprError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let error = |position: usize, message: String| ExprError::Parse {
        input: input.to_string(),
        position,
        message,
    };

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (position, c) = chars[i];
        let simple = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '*' => {
                if chars.get(i + 1).map(|(_, c)| *c) == Some('*') {
                    i += 1;
                    Some(Token::Caret)
                } else {
                    Some(Token::Star)
                }
            }
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(SpannedToken { token, position });
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            // Exponent part, e.g. 1.5e-3
            if i < chars.len() && (chars[i].1 == 'e' || chars[i].1 == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j].1 == '+' || chars[j].1 == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    while j < chars.len() && chars[j].1.is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| error(position, format!("invalid number `{}`", text)))?;
            tokens.push(SpannedToken {
                token: Token::Number(value),
                position,
            });
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push(SpannedToken {
                token: Token::Ident(name),
                position,
            });
        } else {
            return Err(error(position, format!("unexpected character `{}`", c)));
        }
    }
    tokens.push(SpannedToken {
        token: Token::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

pub(super) struct Parser<'a> {
    input: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Result<Self, ExprError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    pub fn parse(mut self) -> Result<Expr, ExprError> {
        let expr = self.sum()?;
        match self.peek() {
            Token::Eof => Ok(expr),
            token => Err(self.error(format!("unexpected token {:?}", token))),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: String) -> ExprError {
        let position = self.tokens[self.pos.min(self.tokens.len() - 1)].position;
        ExprError::Parse {
            input: self.input.to_string(),
            position,
            message,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", expected, self.peek())))
        }
    }

    // sum := product (('+' | '-') product)*
    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.product()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    lhs = lhs + self.product()?;
                }
                Token::Minus => {
                    self.advance();
                    lhs = lhs - self.product()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    // product := unary (('*' | '/') unary)*
    fn product(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    lhs = lhs * self.unary()?;
                }
                Token::Slash => {
                    self.advance();
                    lhs = lhs / self.unary()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                Ok(-self.unary()?)
            }
            Token::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := primary ('^' unary)?, right associative
    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if *self.peek() == Token::Caret {
            self.advance();
            let exponent = self.unary()?;
            Ok(Expr::Pow(Box::new(base), Box::new(exponent)))
        } else {
            Ok(base)
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Token::Number(v) => Ok(Expr::Num(v)),
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    let func = Func::from_name(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
                    self.advance();
                    let argument = self.sum()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Func(func, Box::new(argument)))
                } else {
                    Ok(Expr::Sym(name))
                }
            }
            Token::LParen => {
                let expr = self.sum()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            token => Err(self.error(format!("unexpected token {:?}", token))),
        }
    }
}
