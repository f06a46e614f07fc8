//! Recursive-descent parser for selection expressions.
//!
//! ```text
//! expr       := term (("OR" | "XOR" | "SUB") term)*
//! term       := factor ("AND" factor)*
//! factor     := "NOT" factor | "(" expr ")" | "*" | comparison
//! comparison := field ("=" | "!=") value
//!             | field ["NOT"] "IN" "(" value ("," value)* ")"
//! ```

use super::lexer::{tokenize, Token, TokenKind};
use super::{Predicate, QueryExpr};
use crate::error::{Result, SchedError};
use crate::protocol::ObservedStatus;

/// Parse a selection expression.
pub fn parse(src: &str) -> Result<QueryExpr> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(SchedError::syntax(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(SchedError::syntax(tok.pos, "unexpected trailing input"));
    }
    Ok(expr)
}

enum Field {
    Status,
    Id,
    Tag(String),
}

enum Value {
    Any,
    Text(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Source length, reported for errors at end of input
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn here(&self) -> usize {
        self.peek().map_or(self.end, |t| t.pos)
    }

    /// Consume the next token if it is the keyword `kw`.
    fn keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Word(w),
                ..
            }) if w.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        let pos = self.here();
        match self.next() {
            Some(tok) if tok.kind == kind => Ok(()),
            _ => Err(SchedError::syntax(pos, format!("expected {}", what))),
        }
    }

    fn expr(&mut self) -> Result<QueryExpr> {
        let mut left = self.term()?;
        loop {
            let combine: fn(Box<QueryExpr>, Box<QueryExpr>) -> QueryExpr = if self.keyword("OR") {
                QueryExpr::Or
            } else if self.keyword("XOR") {
                QueryExpr::Xor
            } else if self.keyword("SUB") {
                QueryExpr::Sub
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = combine(Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<QueryExpr> {
        let mut left = self.factor()?;
        while self.keyword("AND") {
            let right = self.factor()?;
            left = QueryExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<QueryExpr> {
        if self.keyword("NOT") {
            return Ok(QueryExpr::not(self.factor()?));
        }
        if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
            self.pos += 1;
            let inner = self.expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(inner);
        }
        if matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w == "*") {
            self.pos += 1;
            return Ok(QueryExpr::Leaf(Predicate::Any));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<QueryExpr> {
        let (field, field_pos) = self.field()?;

        let op_pos = self.here();
        match self.next().map(|t| t.kind) {
            Some(TokenKind::Eq) => {
                let (value, pos) = self.value()?;
                Ok(QueryExpr::Leaf(predicate(&field, value, pos)?))
            }
            Some(TokenKind::Ne) => {
                let (value, pos) = self.value()?;
                Ok(QueryExpr::not(QueryExpr::Leaf(predicate(&field, value, pos)?)))
            }
            Some(TokenKind::Word(w)) if w.eq_ignore_ascii_case("IN") => self.in_list(&field),
            Some(TokenKind::Word(w)) if w.eq_ignore_ascii_case("NOT") => {
                if !self.keyword("IN") {
                    return Err(SchedError::syntax(self.here(), "expected IN after NOT"));
                }
                Ok(QueryExpr::not(self.in_list(&field)?))
            }
            _ => Err(SchedError::syntax(
                op_pos,
                format!("expected '=', '!=' or IN after field at {}", field_pos),
            )),
        }
    }

    fn in_list(&mut self, field: &Field) -> Result<QueryExpr> {
        self.expect(TokenKind::LParen, "'(' after IN")?;
        let (value, pos) = self.value()?;
        let mut expr = QueryExpr::Leaf(predicate(field, value, pos)?);
        loop {
            let pos = self.here();
            match self.next().map(|t| t.kind) {
                Some(TokenKind::Comma) => {
                    let (value, pos) = self.value()?;
                    let leaf = QueryExpr::Leaf(predicate(field, value, pos)?);
                    expr = QueryExpr::Or(Box::new(expr), Box::new(leaf));
                }
                Some(TokenKind::RParen) => return Ok(expr),
                _ => return Err(SchedError::syntax(pos, "expected ',' or ')' in IN list")),
            }
        }
    }

    fn field(&mut self) -> Result<(Field, usize)> {
        let pos = self.here();
        let Some(Token {
            kind: TokenKind::Word(word),
            ..
        }) = self.next()
        else {
            return Err(SchedError::syntax(pos, "expected field name"));
        };
        let field = if word.eq_ignore_ascii_case("status") {
            Field::Status
        } else if word.eq_ignore_ascii_case("id") {
            Field::Id
        } else {
            match word.split_once('.') {
                Some((prefix, name)) if prefix.eq_ignore_ascii_case("tag") && !name.is_empty() => {
                    Field::Tag(name.to_string())
                }
                _ => {
                    return Err(SchedError::syntax(pos, format!("unknown field '{}'", word)));
                }
            }
        };
        Ok((field, pos))
    }

    fn value(&mut self) -> Result<(Value, usize)> {
        let pos = self.here();
        match self.next().map(|t| t.kind) {
            Some(TokenKind::Word(w)) if w == "*" => Ok((Value::Any, pos)),
            Some(TokenKind::Word(w)) => {
                if is_keyword(&w) {
                    return Err(SchedError::syntax(pos, format!("expected value, found {}", w)));
                }
                Ok((Value::Text(w), pos))
            }
            Some(TokenKind::Str(s)) => Ok((Value::Text(s), pos)),
            _ => Err(SchedError::syntax(pos, "expected value")),
        }
    }
}

fn is_keyword(word: &str) -> bool {
    ["AND", "OR", "XOR", "SUB", "NOT", "IN"]
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}

fn predicate(field: &Field, value: Value, pos: usize) -> Result<Predicate> {
    match (field, value) {
        (Field::Status | Field::Id, Value::Any) => Ok(Predicate::Any),
        (Field::Status, Value::Text(s)) => s
            .parse::<ObservedStatus>()
            .map(Predicate::Status)
            .map_err(|_| SchedError::syntax(pos, format!("unknown status '{}'", s))),
        (Field::Id, Value::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Predicate::Id)
            .map_err(|_| SchedError::syntax(pos, format!("invalid job id '{}'", s))),
        (Field::Tag(key), Value::Any) => Ok(Predicate::Tag {
            key: key.clone(),
            value: None,
        }),
        (Field::Tag(key), Value::Text(s)) => Ok(Predicate::Tag {
            key: key.clone(),
            value: Some(s),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(p: Predicate) -> Box<QueryExpr> {
        Box::new(QueryExpr::Leaf(p))
    }

    fn tag(key: &str, value: Option<&str>) -> Predicate {
        Predicate::Tag {
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("id = 1 OR status = 'Pending' and tag.x = y").unwrap();
        assert_eq!(
            expr,
            QueryExpr::Or(
                leaf(Predicate::Id(1)),
                Box::new(QueryExpr::And(
                    leaf(Predicate::Status(ObservedStatus::Pending)),
                    leaf(tag("x", Some("y"))),
                )),
            )
        );
    }

    #[test]
    fn test_sub_and_xor_are_left_associative() {
        let expr = parse("id=1 SUB id=2 XOR id=3").unwrap();
        assert_eq!(
            expr,
            QueryExpr::Xor(
                Box::new(QueryExpr::Sub(leaf(Predicate::Id(1)), leaf(Predicate::Id(2)))),
                leaf(Predicate::Id(3)),
            )
        );
    }

    #[test]
    fn test_not_in_and_wildcards() {
        let expr = parse("NOT (tag.owner = *) AND status NOT IN (Done, 'failed')").unwrap();
        let QueryExpr::And(left, right) = expr else {
            panic!("expected AND");
        };
        assert_eq!(*left, QueryExpr::not(QueryExpr::Leaf(tag("owner", None))));
        assert_eq!(
            *right,
            QueryExpr::not(QueryExpr::Or(
                leaf(Predicate::Status(ObservedStatus::Done)),
                leaf(Predicate::Status(ObservedStatus::Failed)),
            ))
        );
        assert_eq!(parse("status = *").unwrap(), QueryExpr::Leaf(Predicate::Any));
        assert_eq!(
            parse("* SUB id = 4").unwrap(),
            QueryExpr::Sub(leaf(Predicate::Any), leaf(Predicate::Id(4)))
        );
    }

    #[test]
    fn test_not_equal_and_quoted_star() {
        assert_eq!(
            parse("tag.a != '*'").unwrap(),
            QueryExpr::not(QueryExpr::Leaf(tag("a", Some("*"))))
        );
        assert_eq!(
            parse("status='Returned'").unwrap(),
            QueryExpr::Leaf(Predicate::Status(ObservedStatus::Returned))
        );
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "",
            "status",
            "status = ",
            "status = 'Bogus'",
            "id = abc",
            "color = red",
            "tag. = x",
            "(id = 1",
            "id = 1 id = 2",
            "id IN (1 2)",
            "status = AND",
        ] {
            match parse(bad) {
                Err(SchedError::QuerySyntax { .. }) => {}
                other => panic!("{:?} parsed as {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_error_position() {
        match parse("id = 1 AND foo = 2") {
            Err(SchedError::QuerySyntax { pos, .. }) => assert_eq!(pos, 11),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
