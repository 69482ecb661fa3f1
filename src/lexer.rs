pub use logos::Span;
use logos::{Lexer, Logos};

fn process_string(lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    // Our string syntax is described by /"([^\\"]|\\[0abtnr"\\]|\\x[0-9a-fA-F]{2})*"/
    // We use a more permissive version of this on the Logos side, so that errors are neater.

    let mut string = String::new();

    // Skip the opening quote
    let mut chars = lexer.slice().chars().skip(1).peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('0') => string.push('\0'),
                Some('a') => string.push('\x07'),
                Some('b') => string.push('\x08'),
                Some('t') => string.push('\t'),
                Some('n') => string.push('\n'),
                Some('r') => string.push('\r'),
                Some('\\') => string.push('\\'),
                Some('"') => string.push('"'),
                Some('x' | 'X') => string.push(read_hex_escape(&mut chars)?),
                Some(_) | None => Err(LexerError::MalformedString)?,
            },
            c => string.push(c),
        }
    }

    if chars.next().is_some() {
        return Err(LexerError::MalformedString);
    }
    Ok(Box::from(string.as_str()))
}

// reads exactly two hex digits following `\x`
fn read_hex_escape(iter: &mut impl Iterator<Item = char>) -> Result<char, LexerError> {
    let mut char_code = 0u32;
    for _ in 0..2 {
        let digit = iter
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or(LexerError::MalformedString)?;
        char_code = char_code * 16 + digit;
    }
    char::from_u32(char_code).ok_or(LexerError::InvalidCodepoint(char_code))
}

fn read_integer(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    lexer
        .slice()
        .parse::<i64>()
        .map_err(|_| LexerError::NumberTooBig)
}

fn read_real(lexer: &mut Lexer<Token>) -> Result<f64, LexerError> {
    lexer
        .slice()
        .parse::<f64>()
        .map_err(|_| LexerError::MalformedNumber)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("invalid Unicode codepoint: {0}")]
    InvalidCodepoint(u32),
    #[error("malformed string")]
    MalformedString,
    #[error("malformed number")]
    MalformedNumber,
    #[error("number literal too big")]
    NumberTooBig,
}

/// Tokens are lexed from some source. Whitespace, commas and `#` comments are skipped.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n,]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    /// `@[`, opening an array
    #[token("@[")]
    StartArray,
    /// `@(`, also opening an array
    #[token("@(")]
    StartArrayParen,
    /// `@{`, opening a table
    #[token("@{")]
    StartTable,
    #[token("'")]
    Quote,

    #[regex(r"-?[0-9]+", read_integer, priority = 3)]
    Integer(i64),
    #[regex(r"-?[0-9]+\.[0-9]+([eE][-+]?[0-9]+)?", read_real, priority = 3)]
    #[regex(r"-?[0-9]+[eE][-+]?[0-9]+", read_real, priority = 3)]
    Real(f64),
    #[regex(r#""([^\\"]|\\.)*""#, process_string)]
    String(Box<str>),
    // `:=` is the assignment special, not a keyword
    #[token(":=", |l| Box::from(l.slice()))]
    #[regex(r"[a-zA-Z!$%&*/<=>?^_~+\-|][0-9a-zA-Z!$%&*/:<=>?^_~+\-.@|]*", |l| Box::from(l.slice()))]
    Symbol(Box<str>),
    #[regex(r":[0-9a-zA-Z!$%&*/:<=>?^_~+\-.@|]*", |l| Box::from(&l.slice()[1..]))]
    Keyword(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

#[cfg(test)]
mod tests {
    use super::{LexerError, Token};

    use assert2::{check, let_assert};

    fn tokens(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source).collect()
    }

    #[test]
    fn delimiters() {
        check!(
            tokens("( ) [ ] { } @[ @( @{ '")
                == vec![
                    Ok(Token::LParen),
                    Ok(Token::RParen),
                    Ok(Token::LBracket),
                    Ok(Token::RBracket),
                    Ok(Token::LBrace),
                    Ok(Token::RBrace),
                    Ok(Token::StartArray),
                    Ok(Token::StartArrayParen),
                    Ok(Token::StartTable),
                    Ok(Token::Quote),
                ]
        );
    }

    #[test]
    fn numbers_win_over_symbols() {
        check!(tokens("-5") == vec![Ok(Token::Integer(-5))]);
        check!(tokens("12.5") == vec![Ok(Token::Real(12.5))]);
        check!(tokens("1e3") == vec![Ok(Token::Real(1000.0))]);
        check!(tokens("-") == vec![Ok(Token::Symbol(Box::from("-")))]);
        check!(tokens("-x") == vec![Ok(Token::Symbol(Box::from("-x")))]);
        check!(tokens("99999999999999999999") == vec![Err(LexerError::NumberTooBig)]);
    }

    #[test]
    fn symbols_and_keywords() {
        check!(
            tokens("array-push & := :x <=")
                == vec![
                    Ok(Token::Symbol(Box::from("array-push"))),
                    Ok(Token::Symbol(Box::from("&"))),
                    Ok(Token::Symbol(Box::from(":="))),
                    Ok(Token::Keyword(Box::from("x"))),
                    Ok(Token::Symbol(Box::from("<="))),
                ]
        );
    }

    #[test]
    fn strings() {
        let escaped = tokens(r#""a\tb\"c\x41""#);
        let_assert!([Ok(Token::String(s))] = escaped.as_slice());
        check!(s.as_ref() == "a\tb\"cA");
        check!(tokens(r#""bad \q""#) == vec![Err(LexerError::MalformedString)]);
    }

    #[test]
    fn comments_and_commas_are_skipped() {
        let mut lexer = Token::lexer("# a comment\n(a, b)");
        check!(lexer.next() == Some(Ok(Token::LParen)));
        check!(lexer.span() == (12..13));
        check!(lexer.count() == 3);
    }
}
