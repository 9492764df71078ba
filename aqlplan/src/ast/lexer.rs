// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lexer for the AQL query subset
//!
//! Every token parser must either consume input or return an error. The
//! tokenization loop checks that the remaining input shrinks on each step and
//! reports an error instead of spinning if a parser returns without progress.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace1, one_of},
    combinator::{map, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{delimited, pair, tuple},
    IResult,
};

/// Token types for the AQL subset
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    For,
    In,
    Filter,
    Let,
    Sort,
    Asc,
    Desc,
    Limit,
    Collect,
    Aggregate,
    Into,
    With,
    Return,
    Distinct,
    Outbound,
    Inbound,
    Any,
    And,
    Or,
    Not,
    True,
    False,
    Null,

    // Literals and names
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    DotDot,
    Colon,
    Assign,

    // Operators
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AmpAmp,
    PipePipe,
    Bang,

    EOF,
}

impl Token {
    /// Source spelling of keyword tokens, used where keywords are valid
    /// attribute names (`doc.count`, `doc.filter`)
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::For => "for",
            Token::In => "in",
            Token::Filter => "filter",
            Token::Let => "let",
            Token::Sort => "sort",
            Token::Asc => "asc",
            Token::Desc => "desc",
            Token::Limit => "limit",
            Token::Collect => "collect",
            Token::Aggregate => "aggregate",
            Token::Into => "into",
            Token::With => "with",
            Token::Return => "return",
            Token::Distinct => "distinct",
            Token::Outbound => "outbound",
            Token::Inbound => "inbound",
            Token::Any => "any",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            _ => return None,
        };
        Some(text)
    }
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word.to_ascii_uppercase().as_str() {
        "FOR" => Token::For,
        "IN" => Token::In,
        "FILTER" => Token::Filter,
        "LET" => Token::Let,
        "SORT" => Token::Sort,
        "ASC" => Token::Asc,
        "DESC" => Token::Desc,
        "LIMIT" => Token::Limit,
        "COLLECT" => Token::Collect,
        "AGGREGATE" => Token::Aggregate,
        "INTO" => Token::Into,
        "WITH" => Token::With,
        "RETURN" => Token::Return,
        "DISTINCT" => Token::Distinct,
        "OUTBOUND" => Token::Outbound,
        "INBOUND" => Token::Inbound,
        "ANY" => Token::Any,
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "TRUE" => Token::True,
        "FALSE" => Token::False,
        "NULL" => Token::Null,
        _ => return None,
    };
    Some(token)
}

fn line_comment(input: &str) -> IResult<&str, ()> {
    value((), pair(tag("//"), take_while(|c| c != '\n')))(input)
}

fn block_comment(input: &str) -> IResult<&str, ()> {
    value((), tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Skip whitespace and comments; every branch consumes at least one character
fn trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((value((), multispace1), line_comment, block_comment))),
    )(input)
}

fn word(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)?;
    let token = keyword(text).unwrap_or_else(|| Token::Identifier(text.to_string()));
    Ok((rest, token))
}

fn quoted_identifier(input: &str) -> IResult<&str, Token> {
    map(
        delimited(char('`'), take_while1(|c| c != '`'), char('`')),
        |name: &str| Token::Identifier(name.to_string()),
    )(input)
}

fn number(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let is_float = text.contains(|c| matches!(c, '.' | 'e' | 'E'));
    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Float)))?
    } else {
        match text.parse::<i64>() {
            Ok(i) => Token::Integer(i),
            // out of i64 range: keep the value as a double like the engine does
            Err(_) => text
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Digit)))?,
        }
    };
    Ok((rest, token))
}

fn string_literal(input: &str) -> IResult<&str, Token> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c)) if c == '\'' || c == '"' => c,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };

    let mut text = String::new();
    let mut escaped = false;
    for (offset, c) in chars {
        if escaped {
            text.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[offset + c.len_utf8()..], Token::String(text)));
        } else {
            text.push(c);
        }
    }

    // unterminated string: no other token parser may claim this input
    Err(nom::Err::Failure(Error::new(input, ErrorKind::Eof)))
}

fn operator(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::DotDot, tag("..")),
        value(Token::Equal, tag("==")),
        value(Token::NotEqual, tag("!=")),
        value(Token::LessEqual, tag("<=")),
        value(Token::GreaterEqual, tag(">=")),
        value(Token::AmpAmp, tag("&&")),
        value(Token::PipePipe, tag("||")),
        value(Token::LessThan, char('<')),
        value(Token::GreaterThan, char('>')),
        value(Token::Assign, char('=')),
        value(Token::Bang, char('!')),
        value(Token::Plus, char('+')),
        value(Token::Minus, char('-')),
        value(Token::Star, char('*')),
        value(Token::Slash, char('/')),
        value(Token::Percent, char('%')),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LeftParen, char('(')),
        value(Token::RightParen, char(')')),
        value(Token::LeftBracket, char('[')),
        value(Token::RightBracket, char(']')),
        value(Token::LeftBrace, char('{')),
        value(Token::RightBrace, char('}')),
        value(Token::Comma, char(',')),
        value(Token::Colon, char(':')),
        value(Token::Dot, char('.')),
    ))(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    // numbers before punctuation so that `1..5` lexes as 1, .., 5
    alt((
        number,
        string_literal,
        word,
        quoted_identifier,
        operator,
        punctuation,
    ))(input)
}

/// Split a query string into tokens, terminated by [`Token::EOF`]
pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        let (after_trivia, _) =
            trivia(rest).map_err(|e| format!("Failed to skip whitespace: {:?}", e))?;
        if after_trivia.is_empty() {
            tokens.push(Token::EOF);
            return Ok(tokens);
        }

        let offset = input.len() - after_trivia.len();
        match token(after_trivia) {
            Ok((next, token)) => {
                if next.len() >= after_trivia.len() {
                    return Err(format!("Lexer made no progress at offset {}", offset));
                }
                tokens.push(token);
                rest = next;
            }
            Err(nom::Err::Failure(e)) if e.code == ErrorKind::Eof => {
                return Err(format!("Unterminated string literal at offset {}", offset));
            }
            Err(_) => {
                let found = after_trivia.chars().next().unwrap_or(' ');
                return Err(format!(
                    "Unexpected character '{}' at offset {}",
                    found, offset
                ));
            }
        }
    }
}
