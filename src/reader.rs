//! S-expression reader.
//!
//! Turns program text into raw data ([`Value`]s): integers (decimal or `#x` hex),
//! `#t`/`#f`, symbols, proper and dotted lists, and `'datum` shorthand for
//! `(quote datum)`. Line comments start with `;`. Strings, characters and
//! floating-point literals are not part of the dialect.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, multispace1},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::pair,
};

use crate::value::{Symbol, Value};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind, Result};

type NomError<'a> = nom::error::Error<&'a str>;

/// Allowed non-alphanumeric characters in symbol names
const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$&:^~";

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Valid: non-empty, no leading digit, no "-digit" prefix
fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some('-') if chars.next().is_some_and(|c| c.is_ascii_digit()) => false,
        Some(_) => name.chars().all(is_symbol_char),
    }
}

fn at_delimiter(input: &str) -> bool {
    input
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || "()';".contains(c))
}

fn fail(input: &str, code: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Failure(NomError::new(input, code))
}

fn reject(input: &str, code: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Error(NomError::new(input, code))
}

/// Errors inside a list or quote are committed: no other alternative could match
fn commit(err: nom::Err<NomError<'_>>) -> nom::Err<NomError<'_>> {
    match err {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    }
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), opt(is_not("\n")))).parse(input)
}

/// Skip whitespace and comments
fn atmosphere(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, comment)))).parse(input)
}

fn parse_decimal(input: &str) -> IResult<&str, Value> {
    let (rest, digits) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;

    if !at_delimiter(rest) {
        return Err(reject(input, ErrorKind::Digit));
    }
    match digits.parse::<i64>() {
        Ok(n) => Ok((rest, Value::Integer(n))),
        Err(_) => Err(fail(input, ErrorKind::Verify)),
    }
}

fn parse_hexadecimal(input: &str) -> IResult<&str, Value> {
    let (rest, _) = char('#').parse(input)?;
    let (rest, _) = alt((char('x'), char('X'))).parse(rest)?;
    let (rest, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(rest)?;

    if !at_delimiter(rest) {
        return Err(reject(input, ErrorKind::HexDigit));
    }
    match i64::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((rest, Value::Integer(n))),
        Err(_) => Err(fail(input, ErrorKind::Verify)),
    }
}

fn parse_bool(input: &str) -> IResult<&str, Value> {
    let (rest, b) = alt((
        value(Value::Boolean(true), tag("#t")),
        value(Value::Boolean(false), tag("#f")),
    ))
    .parse(input)?;
    if at_delimiter(rest) {
        Ok((rest, b))
    } else {
        Err(reject(input, ErrorKind::Tag))
    }
}

fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let (rest, candidate) = take_while1(is_symbol_char).parse(input)?;
    if is_valid_symbol(candidate) && at_delimiter(rest) {
        Ok((rest, Value::Symbol(Symbol::intern(candidate))))
    } else {
        Err(reject(input, ErrorKind::Alpha))
    }
}

fn parse_quote(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Value> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, datum) = parse_datum(rest, depth + 1, max_depth).map_err(commit)?;
    Ok((
        rest,
        Value::list([Value::Symbol(Symbol::intern("quote")), datum]),
    ))
}

fn parse_list(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, _) = atmosphere(input)?;
        if let Some(rest) = rest.strip_prefix(')') {
            return Ok((rest, Value::list(items)));
        }
        if rest.is_empty() {
            return Err(fail(rest, ErrorKind::Eof));
        }
        if let Some(after_dot) = rest.strip_prefix('.')
            && at_delimiter(after_dot)
        {
            if items.is_empty() {
                return Err(fail(rest, ErrorKind::Char));
            }
            let (after_tail, tail) = parse_datum(after_dot, depth + 1, max_depth).map_err(commit)?;
            let (after_tail, _) = atmosphere(after_tail)?;
            return match after_tail.strip_prefix(')') {
                Some(after_close) => Ok((after_close, Value::improper_list(items, tail))),
                None if after_tail.is_empty() => Err(fail(after_tail, ErrorKind::Eof)),
                None => Err(fail(after_tail, ErrorKind::Char)),
            };
        }

        let (rest, item) = parse_datum(rest, depth + 1, max_depth).map_err(commit)?;
        items.push(item);
        input = rest;
    }
}

fn parse_datum(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Value> {
    if depth >= max_depth {
        return Err(fail(input, ErrorKind::TooLarge));
    }
    let (input, _) = atmosphere(input)?;
    if input.is_empty() {
        return Err(fail(input, ErrorKind::Eof));
    }
    if input.starts_with('"') {
        return Err(fail(input, ErrorKind::Fail));
    }
    alt((
        |i| parse_quote(i, depth, max_depth),
        |i| parse_list(i, depth, max_depth),
        parse_hexadecimal,
        parse_decimal,
        parse_bool,
        parse_symbol,
    ))
    .parse(input)
}

fn to_parse_error(input: &str, error: nom::Err<NomError<'_>>, max_depth: usize) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("expression too deeply nested (max depth: {max_depth})"),
                ),
                ErrorKind::Fail => (
                    ParseErrorKind::Unsupported,
                    "string literals are not supported".to_owned(),
                ),
                ErrorKind::Verify => (
                    ParseErrorKind::InvalidSyntax,
                    "integer literal out of range".to_owned(),
                ),
                _ if position >= input.len() => (
                    ParseErrorKind::Incomplete,
                    "unexpected end of input".to_owned(),
                ),
                ErrorKind::Eof => (
                    ParseErrorKind::Incomplete,
                    "unexpected end of input".to_owned(),
                ),
                _ => {
                    let near: String = input[position..].chars().take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("invalid syntax near '{near}'"),
                    )
                }
            };
            ParseError::with_context(kind, message, input, position)
        }
        nom::Err::Incomplete(_) => ParseError::new(
            ParseErrorKind::Incomplete,
            "incomplete input",
            input.len(),
        ),
    }
}

/// Read every datum in `input`
pub fn parse(input: &str) -> Result<Vec<Value>> {
    parse_with_depth(input, MAX_PARSE_DEPTH)
}

/// Read every datum in `input`, rejecting nesting deeper than `max_depth`
pub fn parse_with_depth(input: &str, max_depth: usize) -> Result<Vec<Value>> {
    let mut data = Vec::new();
    let mut rest = input;
    loop {
        let (after, _) = atmosphere(rest).map_err(|e| to_parse_error(input, e, max_depth))?;
        if after.is_empty() {
            return Ok(data);
        }
        let (next, datum) =
            parse_datum(after, 0, max_depth).map_err(|e| to_parse_error(input, e, max_depth))?;
        data.push(datum);
        rest = next;
    }
}

/// Read exactly one datum
pub fn parse_one(input: &str) -> Result<Value> {
    let mut data = parse(input)?;
    match data.len() {
        1 => Ok(data.remove(0)),
        0 => Err(ParseError::new(ParseErrorKind::Incomplete, "no datum in input", 0).into()),
        n => Err(ParseError::with_context(
            ParseErrorKind::InvalidSyntax,
            format!("expected one datum, found {n}"),
            input,
            0,
        )
        .into()),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::{nil, sym, val};

    #[derive(Debug)]
    enum ReadTestResult {
        Success(Value),
        SpecificError(ParseErrorKind),
        Error,
    }
    use ReadTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ReadTestResult {
        Success(value.into())
    }

    fn run_read_tests(test_cases: Vec<(&str, ReadTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Read test #{} ({input:?})", i + 1);
            match (parse_one(input), expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");
                    // Printed data reads back to the same value
                    let reread = parse_one(&actual.to_string()).unwrap();
                    assert_eq!(reread, actual, "{test_id}: display round trip");
                }
                (Err(crate::Error::Parse(err)), SpecificError(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: wrong error kind: {err}");
                }
                (Err(_), Error) => {}
                (Ok(actual), _) => panic!("{test_id}: expected error, got {actual:?}"),
                (Err(err), _) => panic!("{test_id}: unexpected error {err}"),
            }
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_reader_comprehensive() {
        let test_cases = vec![
            // ===== NUMBERS =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("#x1A", success(26)),
            ("#Xff", success(255)),
            ("9223372036854775807", success(i64::MAX)),
            ("99999999999999999999", SpecificError(ParseErrorKind::InvalidSyntax)),
            ("3.14", Error),
            ("#xG", Error),
            ("123abc", Error),
            // ===== BOOLEANS =====
            ("#t", success(true)),
            ("#f", success(false)),
            ("#true", Error),
            // ===== SYMBOLS =====
            ("foo", success(sym("foo"))),
            ("call/cc", success(sym("call/cc"))),
            ("set-car!", success(sym("set-car!"))),
            ("null?", success(sym("null?"))),
            ("-", success(sym("-"))),
            ("<=", success(sym("<="))),
            ("-abc", success(sym("-abc"))),
            ("-42name", Error),
            // ===== LISTS =====
            ("()", success(nil())),
            ("(1 2 3)", success(vec![1, 2, 3])),
            ("( 1\n\t2 )", success(vec![1, 2])),
            ("(a (b c) ())", success(vec![sym("a"), val(vec![sym("b"), sym("c")]), nil()])),
            ("(1 . 2)", success(Value::cons(val(1), val(2)))),
            (
                "(1 2 . (3))",
                success(vec![1, 2, 3]),
            ),
            ("(. 2)", Error),
            ("(1 . 2 3)", Error),
            ("(1 2", SpecificError(ParseErrorKind::Incomplete)),
            ("(1 . ", SpecificError(ParseErrorKind::Incomplete)),
            (")", Error),
            // ===== QUOTE =====
            ("'x", success(vec![sym("quote"), sym("x")])),
            ("'(1 2)", success(vec![sym("quote"), val(vec![1, 2])])),
            ("'", SpecificError(ParseErrorKind::Incomplete)),
            // ===== COMMENTS =====
            ("; leading comment\n7", success(7)),
            ("(1 ; inside\n 2)", success(vec![1, 2])),
            // ===== UNSUPPORTED =====
            ("\"text\"", SpecificError(ParseErrorKind::Unsupported)),
        ];
        run_read_tests(test_cases);
    }

    #[test]
    fn test_multiple_data() {
        let data = parse("(define x 1)\n; done\nx  ").unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1], sym("x"));
        assert!(parse("   ; nothing\n").unwrap().is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse_with_depth(&deep, 20).is_ok());
        match parse_with_depth(&deep, 5) {
            Err(crate::Error::Parse(err)) => assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested),
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_position() {
        let Err(crate::Error::Parse(err)) = parse("(ok) (bad 1x)") else {
            panic!("expected parse error");
        };
        assert_eq!(err.position, 10);
        assert_eq!(err.found.as_deref(), Some("1x)"));
        assert!(err.context.is_some());
    }
}
