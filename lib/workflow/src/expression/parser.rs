//! Recursive-descent parser producing [`Expr`] trees.

use super::ast::{BinaryOp, Expr, Root, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};
use crate::error::ExpressionError;
use serde_json::Value as JsonValue;

/// Parses one expression; trailing tokens are an error.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.expr()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::syntax(
            extra.position,
            format!("unexpected {:?}", extra.token),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.position)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ExpressionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ExpressionError::syntax(
                self.position(),
                format!("expected {token:?}"),
            ))
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let condition = self.coalesce()?;
        if self.eat(&Token::Question) {
            let then = self.expr()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.expr()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn coalesce(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.or()?;
        while self.eat(&Token::Coalesce) {
            let right = self.or()?;
            left = Expr::Coalesce(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            Self::compare,
            &[
                (Token::StrictEq, BinaryOp::StrictEqual),
                (Token::StrictNotEq, BinaryOp::StrictNotEqual),
                (Token::Eq, BinaryOp::Equal),
                (Token::NotEq, BinaryOp::NotEqual),
            ],
        )
    }

    fn compare(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::LessThan),
                (Token::LtEq, BinaryOp::LessThanOrEqual),
                (Token::Gt, BinaryOp::GreaterThan),
                (Token::GtEq, BinaryOp::GreaterThanOrEqual),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            Self::multiplicative,
            &[
                (Token::Plus, BinaryOp::Add),
                (Token::Minus, BinaryOp::Subtract),
            ],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Multiply),
                (Token::Slash, BinaryOp::Divide),
                (Token::Percent, BinaryOp::Remainder),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        // Once a chain goes optional, the rest of it short-circuits on null.
        let mut optional = false;
        loop {
            if self.eat(&Token::Dot) {
                let field = self.ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    field,
                    optional,
                };
            } else if self.eat(&Token::OptionalDot) {
                optional = true;
                expr = if self.eat(&Token::LBracket) {
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional,
                    }
                } else {
                    Expr::Member {
                        object: Box::new(expr),
                        field: self.ident()?,
                        optional,
                    }
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn ident(&mut self) -> Result<String, ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(ExpressionError::syntax(position, "expected field name")),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(JsonValue::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(JsonValue::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(JsonValue::Bool(true))),
                "false" => Ok(Expr::Literal(JsonValue::Bool(false))),
                "null" => Ok(Expr::Literal(JsonValue::Null)),
                _ => Err(ExpressionError::UnknownReference { reference: name }),
            },
            Some(Token::Var(name)) if name == "node" => self.node_ref(),
            Some(Token::Var(name)) => Root::from_name(&name).map(Expr::Root).ok_or_else(|| {
                ExpressionError::UnknownReference {
                    reference: format!("${name}"),
                }
            }),
            Some(Token::LParen) => {
                let expr = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut elements = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        elements.push(self.expr()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Array(elements))
            }
            Some(other) => Err(ExpressionError::syntax(
                position,
                format!("unexpected {other:?}"),
            )),
            None => Err(ExpressionError::syntax(position, "unexpected end of expression")),
        }
    }

    fn node_ref(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        if self.eat(&Token::Dot) {
            return Ok(Expr::NodeRef(self.ident()?));
        }
        if self.eat(&Token::LBracket) {
            let name = match self.next() {
                Some(Token::Str(name)) => name,
                _ => {
                    return Err(ExpressionError::syntax(
                        position,
                        "$node expects a quoted node name",
                    ));
                }
            };
            self.expect(&Token::RBracket)?;
            return Ok(Expr::NodeRef(name));
        }
        Err(ExpressionError::syntax(
            position,
            "$node must be followed by a node name",
        ))
    }
}
