// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Parser for the AQL query subset using nom parsers over the token stream

use log::debug;
use nom::{
    branch::alt,
    combinator::{map, opt, value},
    multi::{fold_many0, many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::ast::*;
use super::lexer::{tokenize, Token};

/// Parser error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParserError {
    #[error("Lexer error: {0}")]
    LexerError(String),
    #[error("Unexpected token: {0:?}")]
    UnexpectedToken(Token),
    #[error("Unexpected end of query")]
    UnexpectedEnd,
    #[error("Invalid traversal depth {min}..{max}")]
    InvalidTraversalDepth { min: u64, max: u64 },
}

type Tokens<'a> = &'a [Token];

/// Parse a query string into its AST
pub fn parse_query(input: &str) -> Result<Query, ParserError> {
    let tokens = tokenize(input).map_err(ParserError::LexerError)?;
    debug!("Parsing query with {} tokens", tokens.len());

    match query(&tokens) {
        Ok((rest, parsed)) => match rest.first() {
            Some(Token::EOF) | None => {
                validate_traversals(&parsed)?;
                Ok(parsed)
            }
            Some(token) => Err(ParserError::UnexpectedToken(token.clone())),
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => match e.input.first() {
            Some(Token::EOF) | None => Err(ParserError::UnexpectedEnd),
            Some(token) => Err(ParserError::UnexpectedToken(token.clone())),
        },
        Err(nom::Err::Incomplete(_)) => Err(ParserError::UnexpectedEnd),
    }
}

fn validate_traversals(query: &Query) -> Result<(), ParserError> {
    for operation in &query.operations {
        if let Operation::Traversal(traversal) = operation {
            if traversal.min_depth > traversal.max_depth {
                return Err(ParserError::InvalidTraversalDepth {
                    min: traversal.min_depth,
                    max: traversal.max_depth,
                });
            }
        }
    }
    Ok(())
}

// Token helpers

fn expect_token(expected: Token) -> impl Fn(&[Token]) -> IResult<&[Token], Token> {
    move |tokens: &[Token]| match tokens.first() {
        Some(token) if std::mem::discriminant(token) == std::mem::discriminant(&expected) => {
            Ok((&tokens[1..], token.clone()))
        }
        _ => Err(nom::Err::Error(nom::error::Error::new(
            tokens,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

fn fail<T>(tokens: Tokens) -> IResult<Tokens, T> {
    Err(nom::Err::Error(nom::error::Error::new(
        tokens,
        nom::error::ErrorKind::Verify,
    )))
}

fn identifier(tokens: Tokens) -> IResult<Tokens, String> {
    match tokens.first() {
        Some(Token::Identifier(name)) => Ok((&tokens[1..], name.clone())),
        _ => fail(tokens),
    }
}

/// Identifier or keyword spelled as a name (attribute names, object keys)
fn name(tokens: Tokens) -> IResult<Tokens, String> {
    match tokens.first() {
        Some(Token::Identifier(name)) => Ok((&tokens[1..], name.clone())),
        Some(token) => match token.keyword_text() {
            Some(text) => Ok((&tokens[1..], text.to_string())),
            None => fail(tokens),
        },
        None => fail(tokens),
    }
}

/// Case-insensitive contextual keyword such as COUNT in `WITH COUNT INTO`
fn contextual_keyword(word: &'static str) -> impl Fn(&[Token]) -> IResult<&[Token], ()> {
    move |tokens: &[Token]| match tokens.first() {
        Some(Token::Identifier(name)) if name.eq_ignore_ascii_case(word) => {
            Ok((&tokens[1..], ()))
        }
        _ => fail(tokens),
    }
}

fn unsigned(tokens: Tokens) -> IResult<Tokens, u64> {
    match tokens.first() {
        Some(Token::Integer(i)) if *i >= 0 => Ok((&tokens[1..], *i as u64)),
        _ => fail(tokens),
    }
}

// Query structure

fn query(tokens: Tokens) -> IResult<Tokens, Query> {
    let (tokens, operations) = many0(operation)(tokens)?;
    let (tokens, return_clause) = return_clause(tokens)?;
    Ok((
        tokens,
        Query {
            operations,
            return_clause,
        },
    ))
}

fn operation(tokens: Tokens) -> IResult<Tokens, Operation> {
    alt((
        for_operation,
        map(preceded(expect_token(Token::Filter), expression), Operation::Filter),
        let_operation,
        sort_operation,
        limit_operation,
        map(collect_clause, Operation::Collect),
    ))(tokens)
}

fn for_operation(tokens: Tokens) -> IResult<Tokens, Operation> {
    let (tokens, _) = expect_token(Token::For)(tokens)?;
    let (tokens, variables) = separated_list1(expect_token(Token::Comma), identifier)(tokens)?;
    let (tokens, _) = expect_token(Token::In)(tokens)?;

    if let Ok((rest, (min_depth, max_depth, direction, start, edge_collection))) =
        traversal_tail(tokens)
    {
        if variables.len() <= 3 {
            let mut names = variables.into_iter();
            let vertex_variable = names.next().unwrap_or_default();
            return Ok((
                rest,
                Operation::Traversal(TraversalClause {
                    vertex_variable,
                    edge_variable: names.next(),
                    path_variable: names.next(),
                    min_depth,
                    max_depth,
                    direction,
                    start,
                    edge_collection,
                }),
            ));
        }
    }

    if variables.len() != 1 {
        return fail(tokens);
    }
    let (tokens, source) = expression(tokens)?;
    let variable = variables.into_iter().next().unwrap_or_default();
    Ok((tokens, Operation::For { variable, source }))
}

type TraversalTail = (u64, u64, EdgeDirection, Expression, String);

fn traversal_tail(tokens: Tokens) -> IResult<Tokens, TraversalTail> {
    tuple((
        unsigned,
        preceded(expect_token(Token::DotDot), unsigned),
        alt((
            value(EdgeDirection::Outbound, expect_token(Token::Outbound)),
            value(EdgeDirection::Inbound, expect_token(Token::Inbound)),
            value(EdgeDirection::Any, expect_token(Token::Any)),
        )),
        expression,
        identifier,
    ))(tokens)
}

fn let_operation(tokens: Tokens) -> IResult<Tokens, Operation> {
    map(
        tuple((
            expect_token(Token::Let),
            identifier,
            expect_token(Token::Assign),
            expression,
        )),
        |(_, variable, _, value)| Operation::Let { variable, value },
    )(tokens)
}

fn sort_operation(tokens: Tokens) -> IResult<Tokens, Operation> {
    let sort_item = map(
        pair(
            expression,
            opt(alt((
                value(true, expect_token(Token::Asc)),
                value(false, expect_token(Token::Desc)),
            ))),
        ),
        |(expression, direction)| SortItem {
            expression,
            ascending: direction.unwrap_or(true),
        },
    );
    map(
        preceded(
            expect_token(Token::Sort),
            separated_list1(expect_token(Token::Comma), sort_item),
        ),
        Operation::Sort,
    )(tokens)
}

fn limit_operation(tokens: Tokens) -> IResult<Tokens, Operation> {
    map(
        preceded(
            expect_token(Token::Limit),
            pair(unsigned, opt(preceded(expect_token(Token::Comma), unsigned))),
        ),
        |(first, second)| match second {
            Some(count) => Operation::Limit {
                offset: first,
                count,
            },
            None => Operation::Limit {
                offset: 0,
                count: first,
            },
        },
    )(tokens)
}

fn assignment(tokens: Tokens) -> IResult<Tokens, (String, Expression)> {
    map(
        tuple((identifier, expect_token(Token::Assign), expression)),
        |(name, _, expr)| (name, expr),
    )(tokens)
}

fn aggregate_assignment(tokens: Tokens) -> IResult<Tokens, AggregateAssignment> {
    let (rest, (variable, expr)) = assignment(tokens)?;
    match expr {
        Expression::FunctionCall {
            name,
            mut arguments,
        } if arguments.len() == 1 => Ok((
            rest,
            AggregateAssignment {
                variable,
                function: name.to_ascii_uppercase(),
                argument: arguments.remove(0),
            },
        )),
        _ => fail(tokens),
    }
}

fn collect_clause(tokens: Tokens) -> IResult<Tokens, CollectClause> {
    let (tokens, _) = expect_token(Token::Collect)(tokens)?;
    let (tokens, groups) = separated_list0(expect_token(Token::Comma), assignment)(tokens)?;
    let (tokens, aggregates) = opt(preceded(
        expect_token(Token::Aggregate),
        separated_list1(expect_token(Token::Comma), aggregate_assignment),
    ))(tokens)?;
    let (tokens, into) = opt(preceded(expect_token(Token::Into), identifier))(tokens)?;
    let (tokens, count_into) = opt(preceded(
        tuple((
            expect_token(Token::With),
            contextual_keyword("COUNT"),
            expect_token(Token::Into),
        )),
        identifier,
    ))(tokens)?;

    Ok((
        tokens,
        CollectClause {
            groups,
            aggregates: aggregates.unwrap_or_default(),
            into,
            count_into,
        },
    ))
}

fn return_clause(tokens: Tokens) -> IResult<Tokens, ReturnClause> {
    map(
        tuple((
            expect_token(Token::Return),
            opt(expect_token(Token::Distinct)),
            expression,
        )),
        |(_, distinct, expression)| ReturnClause {
            distinct: distinct.is_some(),
            expression,
        },
    )(tokens)
}

// Expressions, lowest precedence first

pub(crate) fn expression(tokens: Tokens) -> IResult<Tokens, Expression> {
    or_expression(tokens)
}

fn or_expression(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, first) = and_expression(tokens)?;
    fold_many0(
        preceded(
            alt((expect_token(Token::Or), expect_token(Token::PipePipe))),
            and_expression,
        ),
        move || first.clone(),
        |acc, rhs| Expression::binary(BinaryOperator::Or, acc, rhs),
    )(tokens)
}

fn and_expression(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, first) = not_expression(tokens)?;
    fold_many0(
        preceded(
            alt((expect_token(Token::And), expect_token(Token::AmpAmp))),
            not_expression,
        ),
        move || first.clone(),
        |acc, rhs| Expression::binary(BinaryOperator::And, acc, rhs),
    )(tokens)
}

fn not_expression(tokens: Tokens) -> IResult<Tokens, Expression> {
    alt((
        map(
            preceded(
                alt((expect_token(Token::Not), expect_token(Token::Bang))),
                not_expression,
            ),
            |operand| Expression::Unary {
                operator: UnaryOperator::Not,
                operand: Box::new(operand),
            },
        ),
        comparison,
    ))(tokens)
}

fn comparison_operator(tokens: Tokens) -> IResult<Tokens, BinaryOperator> {
    alt((
        value(BinaryOperator::Equal, expect_token(Token::Equal)),
        value(BinaryOperator::NotEqual, expect_token(Token::NotEqual)),
        value(BinaryOperator::LessEqual, expect_token(Token::LessEqual)),
        value(BinaryOperator::LessThan, expect_token(Token::LessThan)),
        value(BinaryOperator::GreaterEqual, expect_token(Token::GreaterEqual)),
        value(BinaryOperator::GreaterThan, expect_token(Token::GreaterThan)),
        value(BinaryOperator::In, expect_token(Token::In)),
        value(
            BinaryOperator::NotIn,
            pair(expect_token(Token::Not), expect_token(Token::In)),
        ),
    ))(tokens)
}

fn comparison(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, left) = range_expression(tokens)?;
    let (tokens, right) = opt(pair(comparison_operator, range_expression))(tokens)?;
    Ok((
        tokens,
        match right {
            Some((operator, right)) => Expression::binary(operator, left, right),
            None => left,
        },
    ))
}

fn range_expression(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, low) = additive(tokens)?;
    let (tokens, high) = opt(preceded(expect_token(Token::DotDot), additive))(tokens)?;
    Ok((
        tokens,
        match high {
            Some(high) => Expression::Range {
                low: Box::new(low),
                high: Box::new(high),
            },
            None => low,
        },
    ))
}

fn additive(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, first) = multiplicative(tokens)?;
    fold_many0(
        pair(
            alt((
                value(BinaryOperator::Plus, expect_token(Token::Plus)),
                value(BinaryOperator::Minus, expect_token(Token::Minus)),
            )),
            multiplicative,
        ),
        move || first.clone(),
        |acc, (operator, rhs)| Expression::binary(operator, acc, rhs),
    )(tokens)
}

fn multiplicative(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, first) = unary(tokens)?;
    fold_many0(
        pair(
            alt((
                value(BinaryOperator::Multiply, expect_token(Token::Star)),
                value(BinaryOperator::Divide, expect_token(Token::Slash)),
                value(BinaryOperator::Modulo, expect_token(Token::Percent)),
            )),
            unary,
        ),
        move || first.clone(),
        |acc, (operator, rhs)| Expression::binary(operator, acc, rhs),
    )(tokens)
}

fn unary(tokens: Tokens) -> IResult<Tokens, Expression> {
    alt((
        map(preceded(expect_token(Token::Minus), unary), |operand| {
            match operand {
                Expression::Literal(Literal::Integer(i)) => {
                    Expression::Literal(Literal::Integer(-i))
                }
                Expression::Literal(Literal::Float(f)) => Expression::Literal(Literal::Float(-f)),
                operand => Expression::Unary {
                    operator: UnaryOperator::Minus,
                    operand: Box::new(operand),
                },
            }
        }),
        postfix,
    ))(tokens)
}

enum Accessor {
    Attribute(String),
    Index(Expression),
}

fn postfix(tokens: Tokens) -> IResult<Tokens, Expression> {
    let (tokens, base) = primary(tokens)?;
    fold_many0(
        alt((
            map(preceded(expect_token(Token::Dot), name), Accessor::Attribute),
            map(
                delimited(
                    expect_token(Token::LeftBracket),
                    expression,
                    expect_token(Token::RightBracket),
                ),
                Accessor::Index,
            ),
        )),
        move || base.clone(),
        |acc, accessor| match accessor {
            Accessor::Attribute(attribute) => Expression::AttributeAccess {
                base: Box::new(acc),
                attribute,
            },
            Accessor::Index(index) => Expression::IndexAccess {
                base: Box::new(acc),
                index: Box::new(index),
            },
        },
    )(tokens)
}

fn literal(tokens: Tokens) -> IResult<Tokens, Literal> {
    let literal = match tokens.first() {
        Some(Token::Null) => Literal::Null,
        Some(Token::True) => Literal::Boolean(true),
        Some(Token::False) => Literal::Boolean(false),
        Some(Token::Integer(i)) => Literal::Integer(*i),
        Some(Token::Float(f)) => Literal::Float(*f),
        Some(Token::String(s)) => Literal::String(s.clone()),
        _ => return fail(tokens),
    };
    Ok((&tokens[1..], literal))
}

fn function_call(tokens: Tokens) -> IResult<Tokens, Expression> {
    map(
        pair(
            identifier,
            delimited(
                expect_token(Token::LeftParen),
                separated_list0(expect_token(Token::Comma), expression),
                expect_token(Token::RightParen),
            ),
        ),
        |(name, arguments)| Expression::FunctionCall {
            name: name.to_ascii_uppercase(),
            arguments,
        },
    )(tokens)
}

fn object_key(tokens: Tokens) -> IResult<Tokens, String> {
    match tokens.first() {
        Some(Token::String(s)) => Ok((&tokens[1..], s.clone())),
        _ => name(tokens),
    }
}

fn primary(tokens: Tokens) -> IResult<Tokens, Expression> {
    alt((
        map(literal, Expression::Literal),
        map(
            delimited(
                expect_token(Token::LeftParen),
                query,
                expect_token(Token::RightParen),
            ),
            |q| Expression::Subquery(Box::new(q)),
        ),
        delimited(
            expect_token(Token::LeftParen),
            expression,
            expect_token(Token::RightParen),
        ),
        map(
            delimited(
                expect_token(Token::LeftBracket),
                separated_list0(expect_token(Token::Comma), expression),
                expect_token(Token::RightBracket),
            ),
            Expression::Array,
        ),
        map(
            delimited(
                expect_token(Token::LeftBrace),
                separated_list0(
                    expect_token(Token::Comma),
                    map(
                        tuple((object_key, expect_token(Token::Colon), expression)),
                        |(key, _, value)| (key, value),
                    ),
                ),
                expect_token(Token::RightBrace),
            ),
            Expression::Object,
        ),
        function_call,
        map(identifier, Expression::Identifier),
    ))(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Expression {
        Expression::Literal(Literal::Integer(i))
    }

    #[test]
    fn test_parse_range_limit() {
        let query = parse_query("FOR i IN 1..10000 LIMIT 5, 10 RETURN i").unwrap();
        assert_eq!(
            query.operations,
            vec![
                Operation::For {
                    variable: "i".to_string(),
                    source: Expression::Range {
                        low: Box::new(int(1)),
                        high: Box::new(int(10000)),
                    },
                },
                Operation::Limit {
                    offset: 5,
                    count: 10
                },
            ]
        );
        assert_eq!(query.return_clause.expression, Expression::identifier("i"));
    }

    #[test]
    fn test_parse_precedence() {
        let query = parse_query("RETURN 1 + 2 * 3 == 7 AND NOT false").unwrap();
        let expected = Expression::binary(
            BinaryOperator::And,
            Expression::binary(
                BinaryOperator::Equal,
                Expression::binary(
                    BinaryOperator::Plus,
                    int(1),
                    Expression::binary(BinaryOperator::Multiply, int(2), int(3)),
                ),
                int(7),
            ),
            Expression::Unary {
                operator: UnaryOperator::Not,
                operand: Box::new(Expression::Literal(Literal::Boolean(false))),
            },
        );
        assert_eq!(query.return_clause.expression, expected);
    }

    #[test]
    fn test_parse_subquery_source() {
        let query = parse_query("FOR i IN (FOR j IN [1,2,3,4] RETURN j) RETURN i").unwrap();
        match &query.operations[0] {
            Operation::For { source, .. } => {
                assert!(matches!(source, Expression::Subquery(_)));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested_attribute_and_fulltext() {
        let query =
            parse_query("FOR d IN FULLTEXT(docs, 't3.e.x', 'möchten,müller') RETURN d.t3.e.x")
                .unwrap();
        match &query.operations[0] {
            Operation::For { source, .. } => match source {
                Expression::FunctionCall { name, arguments } => {
                    assert_eq!(name, "FULLTEXT");
                    assert_eq!(arguments.len(), 3);
                }
                other => panic!("unexpected source {:?}", other),
            },
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_traversal() {
        let query =
            parse_query("FOR v, e IN 1..2 OUTBOUND 'persons/alice' knows RETURN v._key").unwrap();
        match &query.operations[0] {
            Operation::Traversal(t) => {
                assert_eq!(t.vertex_variable, "v");
                assert_eq!(t.edge_variable.as_deref(), Some("e"));
                assert_eq!(t.path_variable, None);
                assert_eq!((t.min_depth, t.max_depth), (1, 2));
                assert_eq!(t.direction, EdgeDirection::Outbound);
                assert_eq!(t.edge_collection, "knows");
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_collect() {
        let query = parse_query(
            "FOR d IN docs COLLECT city = d.city AGGREGATE total = SUM(d.n) WITH COUNT INTO c RETURN [city, total, c]",
        )
        .unwrap();
        match &query.operations[1] {
            Operation::Collect(collect) => {
                assert_eq!(collect.groups.len(), 1);
                assert_eq!(collect.aggregates[0].function, "SUM");
                assert_eq!(collect.count_into.as_deref(), Some("c"));
                assert_eq!(collect.into, None);
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_in_and_keyword_attributes() {
        let query = parse_query("FOR d IN docs FILTER d.filter NOT IN [1, 2] RETURN d").unwrap();
        match &query.operations[1] {
            Operation::Filter(Expression::Binary { operator, left, .. }) => {
                assert_eq!(*operator, BinaryOperator::NotIn);
                assert_eq!(
                    **left,
                    Expression::AttributeAccess {
                        base: Box::new(Expression::identifier("d")),
                        attribute: "filter".to_string(),
                    }
                );
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_query("FOR d IN docs"),
            Err(ParserError::UnexpectedEnd)
        ));
        assert!(matches!(
            parse_query("FOR d IN docs RETURN d d"),
            Err(ParserError::UnexpectedToken(_))
        ));
        assert!(matches!(
            parse_query("FOR v IN 3..1 OUTBOUND 'a/1' edges RETURN v"),
            Err(ParserError::InvalidTraversalDepth { min: 3, max: 1 })
        ));
    }
}
