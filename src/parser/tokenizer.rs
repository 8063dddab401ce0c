//! Tokenizer for form-logic expressions
//!
//! Produces a flat token stream from a single-line expression string using
//! nom combinators. Both quote styles are accepted for string literals; the
//! keyword set is fixed and tiny.

use super::error::{ParseError, ParseResult};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{map, opt, recognize},
};

/// A single lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// String literal with escapes already resolved
    String(String),
    /// Identifier (binding name, property or method name)
    Identifier(String),
    /// Boolean literal `true`
    True,
    /// Boolean literal `false`
    False,
    /// Null literal
    Null,
    /// `typeof` keyword
    TypeOf,
    /// Addition operator (+)
    Plus,
    /// Subtraction operator (-)
    Minus,
    /// Multiplication operator (*)
    Star,
    /// Division operator (/)
    Slash,
    /// Remainder operator (%)
    Percent,
    /// Equality operator (== or ===)
    Equal,
    /// Inequality operator (!= or !==)
    NotEqual,
    /// Less-than operator (<)
    Less,
    /// Less-than-or-equal operator (<=)
    LessOrEqual,
    /// Greater-than operator (>)
    Greater,
    /// Greater-than-or-equal operator (>=)
    GreaterOrEqual,
    /// Logical AND operator (&&)
    AndAnd,
    /// Logical OR operator (||)
    OrOr,
    /// Logical NOT operator (!)
    Bang,
    /// Conditional operator question mark (?)
    Question,
    /// Conditional operator colon (:)
    Colon,
    /// Member access dot (.)
    Dot,
    /// Argument separator (,)
    Comma,
    /// Left parenthesis (
    LeftParen,
    /// Right parenthesis )
    RightParen,
    /// Left square bracket [
    LeftBracket,
    /// Right square bracket ]
    RightBracket,
}

impl Token {
    /// Map a scanned identifier onto its keyword token, if it is one
    fn from_keyword(ident: &str) -> Option<Token> {
        match ident {
            "true" => Some(Token::True),
            "false" => Some(Token::False),
            "null" => Some(Token::Null),
            "typeof" => Some(Token::TypeOf),
            _ => None,
        }
    }
}

/// A token plus the byte offset it started at
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    /// The token
    pub token: Token,
    /// Byte offset into the source expression
    pub position: usize,
}

/// Tokenize a form-logic expression
pub fn tokenize(input: &str) -> ParseResult<Vec<SpannedToken>> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();
    while !rest.is_empty() {
        let position = input.len() - rest.len();
        let (next, token) = token(rest).map_err(|_| tokenize_failure(rest, position))?;
        tokens.push(SpannedToken { token, position });
        rest = next.trim_start();
    }
    Ok(tokens)
}

/// Classify the failure at the head of `rest` into a precise error
fn tokenize_failure(rest: &str, position: usize) -> ParseError {
    match rest.chars().next() {
        Some(quote @ ('\'' | '"')) if !has_closing_quote(rest, quote) => {
            ParseError::UnclosedString { position }
        }
        Some(character) => ParseError::UnrecognizedCharacter {
            character,
            position,
        },
        None => ParseError::UnexpectedEof,
    }
}

fn has_closing_quote(rest: &str, quote: char) -> bool {
    let mut escaped = false;
    for c in rest.chars().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return true;
        }
    }
    false
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        token_number,
        token_string,
        token_identifier_or_keyword,
        token_multi_char_op,
        token_single_char,
    ))
    .parse(input)
}

fn token_number(input: &str) -> IResult<&str, Token> {
    let (rest, number_str) = recognize((
        take_while1(|c: char| c.is_ascii_digit()),
        opt((char('.'), take_while1(|c: char| c.is_ascii_digit()))),
    ))
    .parse(input)?;

    match number_str.parse::<f64>() {
        Ok(n) => Ok((rest, Token::Number(n))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn token_string(input: &str) -> IResult<&str, Token> {
    let quote = match input.chars().next() {
        Some(q @ ('\'' | '"')) => q,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Char,
            )));
        }
    };

    let mut result = String::new();
    let mut chars = input.char_indices().skip(1);
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => result.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                }),
                None => break,
            },
            c if c == quote => {
                return Ok((&input[offset + c.len_utf8()..], Token::String(result)));
            }
            other => result.push(other),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn token_identifier_or_keyword(input: &str) -> IResult<&str, Token> {
    let (rest, ident) = recognize((
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
    ))
    .parse(input)?;

    let token = Token::from_keyword(ident).unwrap_or_else(|| Token::Identifier(ident.to_string()));
    Ok((rest, token))
}

fn token_multi_char_op(input: &str) -> IResult<&str, Token> {
    alt((
        map(tag("==="), |_| Token::Equal),
        map(tag("!=="), |_| Token::NotEqual),
        map(tag("=="), |_| Token::Equal),
        map(tag("!="), |_| Token::NotEqual),
        map(tag("<="), |_| Token::LessOrEqual),
        map(tag(">="), |_| Token::GreaterOrEqual),
        map(tag("&&"), |_| Token::AndAnd),
        map(tag("||"), |_| Token::OrOr),
    ))
    .parse(input)
}

fn token_single_char(input: &str) -> IResult<&str, Token> {
    alt((
        map(char('+'), |_| Token::Plus),
        map(char('-'), |_| Token::Minus),
        map(char('*'), |_| Token::Star),
        map(char('/'), |_| Token::Slash),
        map(char('%'), |_| Token::Percent),
        map(char('<'), |_| Token::Less),
        map(char('>'), |_| Token::Greater),
        map(char('!'), |_| Token::Bang),
        map(char('?'), |_| Token::Question),
        map(char(':'), |_| Token::Colon),
        map(char('.'), |_| Token::Dot),
        map(char(','), |_| Token::Comma),
        map(char('('), |_| Token::LeftParen),
        map(char(')'), |_| Token::RightParen),
        map(char('['), |_| Token::LeftBracket),
        map(char(']'), |_| Token::RightBracket),
    ))
    .parse(input)
}
