//! Tokenizer for template expressions.

use crate::error::ExpressionError;
use serde_json::Number;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    /// `$name`
    Var(String),
    Dot,
    OptionalDot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Coalesce,
    Or,
    And,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
}

/// A token and its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let mut lexer = Lexer {
        chars: source.char_indices().collect(),
        pos: 0,
        end: source.len(),
    };
    let mut tokens = Vec::new();
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(tokens)
}

struct Lexer {
    chars: Vec<(usize, char)>,
    pos: usize,
    end: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.end, |(i, _)| *i)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, ExpressionError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        let position = self.offset();
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '0'..='9' => self.number(position)?,
            '"' | '\'' => self.string(position)?,
            '$' => {
                self.pos += 1;
                let name = self.ident_text();
                if name.is_empty() {
                    return Err(ExpressionError::syntax(position, "expected name after '$'"));
                }
                Token::Var(name)
            }
            c if c.is_alphabetic() || c == '_' => Token::Ident(self.ident_text()),
            _ => self.punct(position)?,
        };
        Ok(Some(Spanned { token, position }))
    }

    fn ident_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text
    }

    fn number(&mut self, position: usize) -> Result<Token, ExpressionError> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '.' if !is_float && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    if let Some(sign @ ('+' | '-')) = self.peek_at(1) {
                        text.push(sign);
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }

        let number = if is_float {
            text.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            text.parse::<i64>()
                .map(Number::from)
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
        };
        number
            .map(Token::Number)
            .ok_or_else(|| ExpressionError::syntax(position, format!("invalid number '{text}'")))
    }

    fn string(&mut self, position: usize) -> Result<Token, ExpressionError> {
        let quote = self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ExpressionError::syntax(position, "unterminated string")),
                Some(c) if Some(c) == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some(other) => text.push(other),
                    None => return Err(ExpressionError::syntax(position, "unterminated string")),
                },
                Some(c) => text.push(c),
            }
        }
        Ok(Token::Str(text))
    }

    fn punct(&mut self, position: usize) -> Result<Token, ExpressionError> {
        let c = self.bump().unwrap_or_default();
        let next = self.peek();
        let (token, extra) = match (c, next) {
            ('.', _) => (Token::Dot, 0),
            ('?', Some('.')) => (Token::OptionalDot, 1),
            ('?', Some('?')) => (Token::Coalesce, 1),
            ('?', _) => (Token::Question, 0),
            ('[', _) => (Token::LBracket, 0),
            (']', _) => (Token::RBracket, 0),
            ('(', _) => (Token::LParen, 0),
            (')', _) => (Token::RParen, 0),
            (',', _) => (Token::Comma, 0),
            (':', _) => (Token::Colon, 0),
            ('|', Some('|')) => (Token::Or, 1),
            ('&', Some('&')) => (Token::And, 1),
            ('=', Some('=')) if self.peek_at(1) == Some('=') => (Token::StrictEq, 2),
            ('=', Some('=')) => (Token::Eq, 1),
            ('!', Some('=')) if self.peek_at(1) == Some('=') => (Token::StrictNotEq, 2),
            ('!', Some('=')) => (Token::NotEq, 1),
            ('!', _) => (Token::Bang, 0),
            ('<', Some('=')) => (Token::LtEq, 1),
            ('<', _) => (Token::Lt, 0),
            ('>', Some('=')) => (Token::GtEq, 1),
            ('>', _) => (Token::Gt, 0),
            ('+', _) => (Token::Plus, 0),
            ('-', _) => (Token::Minus, 0),
            ('*', _) => (Token::Star, 0),
            ('/', _) => (Token::Slash, 0),
            ('%', _) => (Token::Percent, 0),
            (other, _) => {
                return Err(ExpressionError::syntax(
                    position,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        self.pos += extra;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn tokenizes_member_access_and_comparison() {
        assert_eq!(
            kinds("$json.v >= 10"),
            vec![
                Token::Var("json".into()),
                Token::Dot,
                Token::Ident("v".into()),
                Token::GtEq,
                Token::Number(10.into()),
            ]
        );
    }

    #[test]
    fn distinguishes_question_forms() {
        assert_eq!(
            kinds("a?.b ?? c ? 1 : 2"),
            vec![
                Token::Ident("a".into()),
                Token::OptionalDot,
                Token::Ident("b".into()),
                Token::Coalesce,
                Token::Ident("c".into()),
                Token::Question,
                Token::Number(1.into()),
                Token::Colon,
                Token::Number(2.into()),
            ]
        );
    }

    #[test]
    fn strict_and_loose_equality() {
        assert_eq!(
            kinds("1 === 1 !== 2 == 3 != 4"),
            vec![
                Token::Number(1.into()),
                Token::StrictEq,
                Token::Number(1.into()),
                Token::StrictNotEq,
                Token::Number(2.into()),
                Token::Eq,
                Token::Number(3.into()),
                Token::NotEq,
                Token::Number(4.into()),
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(kinds(r#""a\"b""#), vec![Token::Str("a\"b".into())]);
        assert_eq!(kinds("'it\\'s'"), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn float_literal() {
        let tokens = kinds("2.5");
        assert!(matches!(&tokens[0], Token::Number(n) if n.as_f64() == Some(2.5)));
    }

    #[test]
    fn reports_position_of_bad_character() {
        let err = tokenize("1 # 2").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::SyntaxError {
                position: 2,
                message: "unexpected character '#'".into()
            }
        );
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        assert!(matches!(
            tokenize("'open"),
            Err(ExpressionError::SyntaxError { position: 0, .. })
        ));
    }
}
