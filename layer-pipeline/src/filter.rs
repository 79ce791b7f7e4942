//! Filtres attributaires
//!
//! Sous-ensemble de la clause WHERE d'OGR SQL: comparaisons (`=`, `<>`, `!=`,
//! `<`, `<=`, `>`, `>=`), `AND`/`OR`/`NOT`, parenthèses, `IS [NOT] NULL`,
//! `[NOT] LIKE` (insensible à la casse, jokers `%` et `_`) et `[NOT] IN (...)`.
//! Les noms de champs sont résolus sans tenir compte de la casse.

use std::cmp::Ordering;

use crate::error::LayerError;
use crate::types::{Feature, FieldSpec, FieldValue};

/// Filtre compilé contre un schéma
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    expression: String,
    root: Expr,
}

impl AttributeFilter {
    /// Compile une expression contre le schéma d'une couche
    pub fn parse(expression: &str, schema: &[FieldSpec]) -> Result<Self, LayerError> {
        let invalid = |reason: String| LayerError::InvalidFilter {
            expression: expression.to_string(),
            reason,
        };

        let tokens = tokenize(expression).map_err(invalid)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            schema,
        };
        let root = parser.parse_or().map_err(invalid)?;
        if let Some(token) = parser.peek() {
            return Err(invalid(format!("unexpected token {:?}", token)));
        }

        Ok(Self {
            expression: expression.to_string(),
            root,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// L'entité satisfait-elle le filtre ?
    pub fn matches(&self, feature: &Feature) -> bool {
        eval(&self.root, feature).truthy()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Number(f64),
    Str(String),
    Op(CmpOp),
    Minus,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0,
            Scalar::Null | Scalar::Text(_) => false,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Null => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Number(n) => Some(n.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Null => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(usize),
    Literal(Scalar),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    Like {
        operand: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    In {
        operand: Box<Expr>,
        list: Vec<Scalar>,
        negated: bool,
    },
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err("expected '=' after '!'".to_string());
                }
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '\'' | '"' => {
                let (text, next) = read_quoted(&chars, i)?;
                tokens.push(if c == '\'' {
                    Token::Str(text)
                } else {
                    Token::Quoted(text)
                });
                i = next;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let d = chars[i];
                    let exponent_sign =
                        (d == '+' || d == '-') && matches!(chars.get(i - 1), Some('e' | 'E'));
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

/// Lit une chaîne délimitée par `chars[start]`, le délimiteur doublé valant échappement
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err("unterminated quoted string".to_string()),
            Some(&c) if c == quote => {
                if chars.get(i + 1) == Some(&quote) {
                    text.push(quote);
                    i += 2;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'a [FieldSpec],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos + offset), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword_at(0, keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, String> {
        let operand = Box::new(self.parse_primary()?);

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err("expected NULL after IS".to_string());
            }
            return Ok(Expr::IsNull { operand, negated });
        }

        let negated = self.is_keyword_at(0, "NOT")
            && (self.is_keyword_at(1, "LIKE") || self.is_keyword_at(1, "IN"));
        if negated {
            self.pos += 1;
        }

        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Expr::Like {
                    operand,
                    pattern,
                    negated,
                }),
                other => Err(format!("expected string pattern after LIKE, found {:?}", other)),
            };
        }

        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut list = vec![self.parse_literal()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                list.push(self.parse_literal()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In {
                operand,
                list,
                negated,
            });
        }

        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(operand, op, Box::new(right)));
        }

        Ok(*operand)
    }

    fn parse_literal(&mut self) -> Result<Scalar, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Scalar::Number(n)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(n)) => Ok(Scalar::Number(-n)),
                other => Err(format!("expected number after '-', found {:?}", other)),
            },
            Some(Token::Str(s)) => Ok(Scalar::Text(s)),
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("NULL") => Ok(Scalar::Null),
            other => Err(format!("expected literal, found {:?}", other)),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if !name.eq_ignore_ascii_case("NULL") => {
                self.pos += 1;
                self.resolve_field(&name)
            }
            Some(Token::Quoted(name)) => {
                self.pos += 1;
                self.resolve_field(&name)
            }
            Some(_) => Ok(Expr::Literal(self.parse_literal()?)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn resolve_field(&self, name: &str) -> Result<Expr, String> {
        self.schema
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .map(Expr::Field)
            .ok_or_else(|| format!("unknown field '{name}'"))
    }
}

fn field_scalar(value: Option<&FieldValue>) -> Scalar {
    match value {
        None | Some(FieldValue::Null) => Scalar::Null,
        Some(FieldValue::Integer(i)) => Scalar::Number(*i as f64),
        Some(FieldValue::Real(r)) => Scalar::Number(*r),
        Some(other) => other.to_text().map_or(Scalar::Null, Scalar::Text),
    }
}

fn eval(expr: &Expr, feature: &Feature) -> Scalar {
    match expr {
        Expr::Field(index) => field_scalar(feature.field(*index)),
        Expr::Literal(value) => value.clone(),
        Expr::Compare(left, op, right) => {
            let left = eval(left, feature);
            let right = eval(right, feature);
            match compare(&left, &right) {
                Some(ord) => Scalar::Bool(op_holds(*op, ord)),
                None => Scalar::Null,
            }
        }
        Expr::And(left, right) => {
            Scalar::Bool(eval(left, feature).truthy() && eval(right, feature).truthy())
        }
        Expr::Or(left, right) => {
            Scalar::Bool(eval(left, feature).truthy() || eval(right, feature).truthy())
        }
        Expr::Not(inner) => match eval(inner, feature) {
            Scalar::Null => Scalar::Bool(false),
            value => Scalar::Bool(!value.truthy()),
        },
        Expr::IsNull { operand, negated } => {
            let is_null = eval(operand, feature) == Scalar::Null;
            Scalar::Bool(is_null != *negated)
        }
        Expr::Like {
            operand,
            pattern,
            negated,
        } => match eval(operand, feature).as_text() {
            None => Scalar::Bool(false),
            Some(text) => {
                let text: Vec<char> = text.to_lowercase().chars().collect();
                let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
                Scalar::Bool(like_match(&text, &pattern) != *negated)
            }
        },
        Expr::In {
            operand,
            list,
            negated,
        } => {
            let value = eval(operand, feature);
            if value == Scalar::Null {
                return Scalar::Bool(false);
            }
            let found = list
                .iter()
                .any(|item| compare(&value, item) == Some(Ordering::Equal));
            Scalar::Bool(found != *negated)
        }
    }
}

fn compare(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
        (a, b) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.as_text()?.cmp(&b.as_text()?)),
        },
    }
}

fn op_holds(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

fn like_match(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|i| like_match(&text[i..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_match(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_match(&text[1..], rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn schema() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("name", FieldType::String),
            FieldSpec::new("population", FieldType::Integer),
            FieldSpec::new("area", FieldType::Real),
        ]
    }

    fn city(name: &str, population: Option<i64>, area: f64) -> Feature {
        Feature::with_fields(vec![
            FieldValue::String(name.to_string()),
            population.map_or(FieldValue::Null, FieldValue::Integer),
            FieldValue::Real(area),
        ])
    }

    fn check(expression: &str, feature: &Feature) -> bool {
        AttributeFilter::parse(expression, &schema())
            .unwrap()
            .matches(feature)
    }

    #[test]
    fn test_numeric_comparisons() {
        let grenoble = city("Grenoble", Some(158_000), 18.1);
        assert!(check("population > 100000", &grenoble));
        assert!(check("POPULATION >= 158000 AND area < 20", &grenoble));
        assert!(!check("population <> 158000", &grenoble));
        assert!(check("area != 18", &grenoble));
        assert!(check("area > -1.5e1", &grenoble));
    }

    #[test]
    fn test_string_comparisons() {
        let lyon = city("Lyon", Some(520_000), 47.9);
        assert!(check("name = 'Lyon'", &lyon));
        assert!(check("\"name\" = 'Lyon'", &lyon));
        assert!(!check("name = 'lyon'", &lyon));
        assert!(check("name LIKE 'l%n'", &lyon));
        assert!(check("name NOT LIKE 'Par_s'", &lyon));
        assert!(check("name IN ('Paris', 'Lyon')", &lyon));
        assert!(check("population NOT IN (1, 2, 3)", &lyon));
    }

    #[test]
    fn test_null_handling() {
        let hamlet = city("Hameau", None, 0.5);
        assert!(check("population IS NULL", &hamlet));
        assert!(!check("population IS NOT NULL", &hamlet));
        assert!(!check("population > 0", &hamlet));
        assert!(!check("NOT population > 0", &hamlet));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let feature = city("Vif", Some(8_000), 27.0);
        assert!(check("name = 'X' OR population = 8000 AND area = 27", &feature));
        assert!(!check("(name = 'X' OR population = 8000) AND area = 1", &feature));
        assert!(check("NOT (name = 'X')", &feature));
    }

    #[test]
    fn test_quote_escape() {
        let feature = city("L'Isle", Some(1), 1.0);
        assert!(check("name = 'L''Isle'", &feature));
    }

    #[test]
    fn test_parse_errors() {
        let schema = schema();
        assert!(AttributeFilter::parse("unknown = 1", &schema).is_err());
        assert!(AttributeFilter::parse("name = 'open", &schema).is_err());
        assert!(AttributeFilter::parse("name = 1 extra", &schema).is_err());
        assert!(AttributeFilter::parse("population IS 3", &schema).is_err());
        assert!(AttributeFilter::parse("(name = 'a'", &schema).is_err());
    }
}
