//! Turns source text into values. Parenthesized and bracketed forms become tuples that
//! remember their source span, so the compiler can point errors back at them.

use std::iter::Peekable;

use lasso::Rodeo;
use logos::{Span, SpannedIter};

use crate::{
    lexer::{LexerError, Token},
    value::{Struct, Symbol, Table, Tuple, Value},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadErrorKind {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected closing delimiter")]
    UnexpectedClose,
    #[error("struct and table literals need an even number of forms")]
    OddStructLength,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct ReadError {
    pub kind: ReadErrorKind,
    pub span: Span,
}

struct Reader<'src, 'r> {
    tokens: Peekable<SpannedIter<'src, Token>>,
    rodeo: &'r mut Rodeo,
    end: usize,
}

/// Reads every form in `source`
pub fn read_all(source: &str, rodeo: &mut Rodeo) -> Result<Vec<Value>, ReadError> {
    let mut reader = Reader {
        tokens: Token::lexer(source).spanned().peekable(),
        rodeo,
        end: source.len(),
    };
    let mut forms = vec![];
    while reader.tokens.peek().is_some() {
        forms.push(reader.read_form()?);
    }
    Ok(forms)
}

impl Reader<'_, '_> {
    fn eof(&self) -> ReadError {
        ReadError {
            kind: ReadErrorKind::UnexpectedEof,
            span: self.end..self.end,
        }
    }

    fn next_token(&mut self) -> Result<(Token, Span), ReadError> {
        match self.tokens.next() {
            Some((Ok(token), span)) => Ok((token, span)),
            Some((Err(err), span)) => Err(ReadError {
                kind: err.into(),
                span,
            }),
            None => Err(self.eof()),
        }
    }

    fn symbol(&mut self, name: &str) -> Symbol {
        Symbol(self.rodeo.get_or_intern(name))
    }

    fn read_form(&mut self) -> Result<Value, ReadError> {
        let (token, span) = self.next_token()?;
        Ok(match token {
            Token::Integer(i) => Value::Integer(i),
            Token::Real(r) => Value::Real(r),
            Token::String(s) => Value::string(s),
            Token::Keyword(k) => Value::Keyword(self.symbol(&k)),
            Token::Symbol(s) => match s.as_ref() {
                "nil" => Value::Nil,
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                name => Value::Symbol(self.symbol(name)),
            },
            Token::Quote => {
                let quoted = self.read_form()?;
                let quote = self.symbol("quote");
                Value::Tuple(
                    Tuple::new([Value::Symbol(quote), quoted])
                        .with_span(span)
                        .into(),
                )
            }
            Token::LParen => {
                let (items, close) = self.read_until(Token::RParen)?;
                Value::Tuple(Tuple::new(items).with_span(span.start..close.end).into())
            }
            Token::LBracket => {
                let (items, close) = self.read_until(Token::RBracket)?;
                Value::Tuple(
                    Tuple::bracketed(items)
                        .with_span(span.start..close.end)
                        .into(),
                )
            }
            Token::StartArray => Value::array(self.read_until(Token::RBracket)?.0),
            Token::StartArrayParen => Value::array(self.read_until(Token::RParen)?.0),
            Token::LBrace => {
                let (items, close) = self.read_until(Token::RBrace)?;
                let pairs = pairs(items, span.start..close.end)?;
                Value::Struct(pairs.collect::<Struct>().into())
            }
            Token::StartTable => {
                let (items, close) = self.read_until(Token::RBrace)?;
                let pairs = pairs(items, span.start..close.end)?;
                Value::table(pairs.collect::<Table>())
            }
            Token::RParen | Token::RBracket | Token::RBrace => Err(ReadError {
                kind: ReadErrorKind::UnexpectedClose,
                span,
            })?,
        })
    }

    /// Reads forms until `close`, returning them and the closing span
    fn read_until(&mut self, close: Token) -> Result<(Vec<Value>, Span), ReadError> {
        let mut items = vec![];
        loop {
            match self.tokens.peek() {
                Some((Ok(token), span)) if *token == close => {
                    let span = span.clone();
                    self.tokens.next();
                    return Ok((items, span));
                }
                Some(_) => items.push(self.read_form()?),
                None => Err(self.eof())?,
            }
        }
    }
}

fn pairs(
    items: Vec<Value>,
    span: Span,
) -> Result<impl Iterator<Item = (Value, Value)>, ReadError> {
    if items.len() % 2 != 0 {
        return Err(ReadError {
            kind: ReadErrorKind::OddStructLength,
            span,
        });
    }
    let mut items = items.into_iter();
    Ok(core::iter::from_fn(move || {
        Some((items.next()?, items.next()?))
    }))
}
