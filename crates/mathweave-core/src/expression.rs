//! A small expression scanner for the deterministic stages.
//!
//! This is not a computer algebra system. It tokenizes and parses the kind
//! of notation that appears in problem statements and plan steps (`x^2 - 5x
//! + 6 = 0`, `(x-2)(x-3)`, `sqrt(x)/2`) well enough to answer structural
//! questions: what polynomial degree does this reach, what does it divide by,
//! is it a constant, what does it print as in canonical form.
//!
//! Supported: `+ - * / ^` (and `**`), implicit multiplication (`5x`,
//! `2(x+1)`, `(x-1)(x+1)`), unary minus, function application with or
//! without parentheses (`sqrt(x)`, `sin x`), `pi`, and the relations
//! `= != < <= > >=`. Short letter runs are read as products of variables
//! (`xy` is `x*y`); longer words are single opaque names.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Function names recognised by the tokenizer.
pub const FUNCTIONS: &[&str] = &[
    "arcsin", "arccos", "arctan", "sqrt", "cbrt", "sinh", "cosh", "tanh", "sin", "cos", "tan",
    "cot", "sec", "csc", "log", "exp", "abs", "ln",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("relation where an expression was expected")]
    UnexpectedRelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// A chain of expressions joined by relations: `a = b`, `0 < x <= 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub sides: Vec<Expr>,
    pub ops: Vec<RelOp>,
}

// ── Tokenizer ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Func(String),
    LParen,
    RParen,
    Comma,
    Op(BinOp),
    Rel(RelOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Num(n) => format!("number {}", format_number(*n)),
            Self::Ident(s) => format!("name '{s}'"),
            Self::Func(s) => format!("function '{s}'"),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Comma => "','".into(),
            Self::Op(op) => format!("operator {op:?}"),
            Self::Rel(r) => format!("relation '{}'", r.as_str()),
        }
    }

    /// Can end an operand (left side of an implicit product).
    fn ends_operand(&self) -> bool {
        matches!(self, Self::Num(_) | Self::Ident(_) | Self::RParen)
    }

    /// Can start an operand (right side of an implicit product).
    fn starts_operand(&self) -> bool {
        matches!(self, Self::Num(_) | Self::Ident(_) | Self::Func(_) | Self::LParen)
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut raw = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(format!("number '{text}'")))?;
                raw.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let letters: String = chars[start..i].iter().collect();
                let digit_start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[digit_start..i].iter().collect();
                push_word(&mut raw, &letters, &digits);
            }
            '(' | '[' => {
                raw.push(Token::LParen);
                i += 1;
            }
            ')' | ']' => {
                raw.push(Token::RParen);
                i += 1;
            }
            ',' => {
                raw.push(Token::Comma);
                i += 1;
            }
            '+' => {
                raw.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                raw.push(Token::Op(BinOp::Sub));
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    raw.push(Token::Op(BinOp::Pow));
                    i += 2;
                } else {
                    raw.push(Token::Op(BinOp::Mul));
                    i += 1;
                }
            }
            '/' => {
                raw.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '^' => {
                raw.push(Token::Op(BinOp::Pow));
                i += 1;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                raw.push(Token::Rel(RelOp::Eq));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                raw.push(Token::Rel(RelOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    raw.push(Token::Rel(RelOp::Le));
                    i += 2;
                }
                Some('>') => {
                    raw.push(Token::Rel(RelOp::Ne));
                    i += 2;
                }
                _ => {
                    raw.push(Token::Rel(RelOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    raw.push(Token::Rel(RelOp::Ge));
                    i += 2;
                } else {
                    raw.push(Token::Rel(RelOp::Gt));
                    i += 1;
                }
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    // Insert implicit multiplication.
    let mut tokens = Vec::with_capacity(raw.len());
    for token in raw {
        if let Some(prev) = tokens.last()
            && Token::ends_operand(prev)
            && token.starts_operand()
        {
            tokens.push(Token::Op(BinOp::Mul));
        }
        tokens.push(token);
    }
    Ok(tokens)
}

fn push_word(out: &mut Vec<Token>, letters: &str, digits: &str) {
    let lower = letters.to_ascii_lowercase();

    if !digits.is_empty() {
        // x1, a2: subscripted names
        out.push(Token::Ident(format!("{letters}{digits}")));
        return;
    }
    if lower == "pi" {
        out.push(Token::Num(std::f64::consts::PI));
        return;
    }
    if FUNCTIONS.contains(&lower.as_str()) {
        out.push(Token::Func(lower));
        return;
    }
    // sinx, lnx, sqrtx
    if let Some(f) = FUNCTIONS.iter().find(|f| lower.starts_with(**f))
        && letters.len() > f.len()
        && letters.len() - f.len() <= 3
    {
        out.push(Token::Func((*f).to_string()));
        push_word(out, &letters[f.len()..], "");
        return;
    }
    if letters.len() <= 3 {
        for c in letters.chars() {
            out.push(Token::Ident(c.to_string()));
        }
    } else {
        out.push(Token::Ident(letters.to_string()));
    }
}

// ── Parser ──────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Op(BinOp::Sub)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op(BinOp::Add)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if let Some(Token::Op(BinOp::Pow)) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(Token::Func(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Call(name, vec![self.power()?]))
                }
            }
            Some(Token::Rel(_)) => Err(ExprError::UnexpectedRelation),
            Some(other) => Err(ExprError::UnexpectedToken(other.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(ExprError::UnexpectedToken(other.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn parse_tokens(tokens: Vec<Token>) -> Result<Expr, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    match parser.next() {
        None => Ok(expr),
        Some(Token::Rel(_)) => Err(ExprError::UnexpectedRelation),
        Some(other) => Err(ExprError::UnexpectedToken(other.describe())),
    }
}

/// Parse a single expression (no relations).
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    parse_tokens(tokenize(input)?)
}

/// Parse an expression or a chain of relations. A bare expression yields a
/// relation with one side and no operators.
pub fn parse_relation(input: &str) -> Result<Relation, ExprError> {
    let tokens = tokenize(input)?;
    let mut sides = Vec::new();
    let mut ops = Vec::new();
    let mut chunk = Vec::new();
    let mut depth = 0i32;

    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            _ => {}
        }
        if let Token::Rel(op) = token
            && depth == 0
        {
            sides.push(parse_tokens(std::mem::take(&mut chunk))?);
            ops.push(op);
            continue;
        }
        chunk.push(token);
    }
    sides.push(parse_tokens(chunk)?);
    Ok(Relation { sides, ops })
}

// ── Structural queries ──────────────────────────────────────────────────

impl Expr {
    /// Polynomial degree over all variables. `None` when the expression is
    /// not a polynomial (variable in a denominator, exponent or function).
    pub fn degree(&self) -> Option<u32> {
        match self {
            Self::Num(_) => Some(0),
            Self::Var(_) => Some(1),
            Self::Neg(e) => e.degree(),
            Self::Bin(BinOp::Add | BinOp::Sub, l, r) => Some(l.degree()?.max(r.degree()?)),
            Self::Bin(BinOp::Mul, l, r) => Some(l.degree()?.saturating_add(r.degree()?)),
            Self::Bin(BinOp::Div, l, r) => match r.degree()? {
                0 => l.degree(),
                _ => None,
            },
            Self::Bin(BinOp::Pow, base, exp) => {
                let base_degree = base.degree()?;
                if base_degree == 0 {
                    return if exp.has_variables() { None } else { Some(0) };
                }
                let n = exp.constant_value()?;
                if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
                    Some(base_degree.saturating_mul(n as u32))
                } else {
                    None
                }
            }
            Self::Call(_, args) => {
                if args.iter().all(|a| !a.has_variables()) {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Num(_) => {}
            Self::Var(v) => {
                out.insert(v.clone());
            }
            Self::Neg(e) => e.collect_variables(out),
            Self::Bin(_, l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_variables(out)),
        }
    }

    pub fn has_variables(&self) -> bool {
        match self {
            Self::Num(_) => false,
            Self::Var(_) => true,
            Self::Neg(e) => e.has_variables(),
            Self::Bin(_, l, r) => l.has_variables() || r.has_variables(),
            Self::Call(_, args) => args.iter().any(Expr::has_variables),
        }
    }

    /// Numeric value of a variable-free expression, if finite.
    pub fn constant_value(&self) -> Option<f64> {
        let v = match self {
            Self::Num(n) => *n,
            Self::Var(_) => return None,
            Self::Neg(e) => -e.constant_value()?,
            Self::Bin(op, l, r) => {
                let (a, b) = (l.constant_value()?, r.constant_value()?);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Self::Call(name, args) => {
                let [arg] = args.as_slice() else {
                    return None;
                };
                let x = arg.constant_value()?;
                match name.as_str() {
                    "sqrt" => x.sqrt(),
                    "cbrt" => x.cbrt(),
                    "sin" => x.sin(),
                    "cos" => x.cos(),
                    "tan" => x.tan(),
                    "arcsin" => x.asin(),
                    "arccos" => x.acos(),
                    "arctan" => x.atan(),
                    "sinh" => x.sinh(),
                    "cosh" => x.cosh(),
                    "tanh" => x.tanh(),
                    "ln" => x.ln(),
                    "log" => x.log10(),
                    "exp" => x.exp(),
                    "abs" => x.abs(),
                    _ => return None,
                }
            }
        };
        v.is_finite().then_some(v)
    }

    /// Whether the expression is a literal zero (or folds to one).
    pub fn is_zero(&self) -> bool {
        self.constant_value().is_some_and(|v| v == 0.0)
    }

    /// Every expression this one divides by, outermost first.
    pub fn denominators(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_denominators(&mut out);
        out
    }

    fn collect_denominators<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Self::Num(_) | Self::Var(_) => {}
            Self::Neg(e) => e.collect_denominators(out),
            Self::Bin(op, l, r) => {
                if *op == BinOp::Div {
                    out.push(r);
                }
                if *op == BinOp::Pow && r.constant_value().is_some_and(|n| n < 0.0) {
                    out.push(l);
                }
                l.collect_denominators(out);
                r.collect_denominators(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_denominators(out)),
        }
    }

    /// Multiplicative factors: `3x(x-1)^2` gives `3`, `x`, `x - 1`.
    pub fn factors(&self) -> Vec<&Expr> {
        match self {
            Self::Bin(BinOp::Mul, l, r) => {
                let mut out = l.factors();
                out.extend(r.factors());
                out
            }
            Self::Bin(BinOp::Pow, base, exp) if exp.constant_value().is_some_and(|n| n > 0.0) => {
                base.factors()
            }
            Self::Neg(e) => e.factors(),
            _ => vec![self],
        }
    }

    pub fn is_single_variable(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Canonical text with all whitespace removed, for comparisons.
    pub fn canonical(&self) -> String {
        self.to_string().chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Bin(op, _, _) => op.precedence(),
            Self::Neg(_) => 2,
            Self::Num(n) if *n < 0.0 => 2,
            _ => 4,
        }
    }
}

impl Relation {
    /// Highest degree over every side.
    pub fn degree(&self) -> Option<u32> {
        self.sides.iter().map(Expr::degree).try_fold(0u32, |acc, d| Some(acc.max(d?)))
    }
}

// ── Display ─────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => f.write_str(&format_number(*n)),
            Self::Var(v) => f.write_str(v),
            Self::Neg(e) => {
                if e.precedence() <= 2 {
                    write!(f, "-({e})")
                } else {
                    write!(f, "-{e}")
                }
            }
            Self::Bin(op, l, r) => {
                let p = op.precedence();
                let left_parens = l.precedence() < p || (*op == BinOp::Pow && l.precedence() <= p);
                let right_parens = r.precedence() < p
                    || (r.precedence() == p && matches!(op, BinOp::Sub | BinOp::Div | BinOp::Mul));
                let sym = match op {
                    BinOp::Add => " + ",
                    BinOp::Sub => " - ",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Pow => "^",
                };
                write_operand(f, l, left_parens)?;
                f.write_str(sym)?;
                write_operand(f, r, right_parens)
            }
            Self::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({e})")
    } else {
        write!(f, "{e}")
    }
}

/// Render a number without float noise: integers print without a fraction
/// and other values keep at most ten decimals.
pub fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    let rounded = v.round();
    if (v - rounded).abs() < 1e-9 && rounded.abs() < 1e15 {
        let i = rounded as i64;
        return i.to_string();
    }
    let text = format!("{v:.10}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" { "0".into() } else { text.to_string() }
}

// ── Statement scanning ──────────────────────────────────────────────────

static ALTERNATIVES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:,|;|\bor\b|\band\b)\s*").expect("static pattern")
});

/// Split `x = 2 or x = 3`, `x=2, x=3` into the individual parts.
pub fn split_alternatives(text: &str) -> Vec<&str> {
    ALTERNATIVES
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse each alternative of `text` as a relation; parts that fail to parse
/// are skipped.
pub fn parse_alternatives(text: &str) -> Vec<Relation> {
    split_alternatives(text)
        .into_iter()
        .filter_map(|part| parse_relation(part).ok())
        .collect()
}

fn is_math_word(word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "+-*/^=<>!().[]".contains(c);
    if !word.chars().all(allowed) {
        return false;
    }
    let letters_only = word.chars().all(|c| c.is_ascii_alphabetic());
    if !letters_only {
        return true;
    }
    word.len() == 1 || FUNCTIONS.contains(&word.to_ascii_lowercase().as_str())
}

/// Pull the formula-looking runs out of prose: `Solve x^2 - 5x + 6 = 0 for
/// real x` yields `x^2 - 5x + 6 = 0`. Runs without an operator are dropped.
pub fn math_segments(statement: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if !current.is_empty() {
            let joined = current.join(" ");
            if joined.chars().any(|c| "+-*/^=<>".contains(c)) {
                segments.push(joined);
            }
            current.clear();
        }
    };

    for raw in statement.split_whitespace() {
        let word = raw.trim_end_matches(['.', ',', '?', ';', ':']);
        let word = word.trim_start_matches(['"', '\'']);
        if is_math_word(word) {
            current.push(word);
        } else {
            flush(&mut current);
        }
        if raw.len() != word.len() && raw.ends_with([',', ';', '?', ':']) {
            flush(&mut current);
        }
    }
    flush(&mut current);
    segments
}

/// Highest polynomial degree among the formulas in a statement. Formulas
/// that are not polynomials or fail to parse are ignored.
pub fn statement_degree(statement: &str) -> u32 {
    math_segments(statement)
        .iter()
        .flat_map(|s| parse_alternatives(s))
        .filter_map(|r| r.degree())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deg(s: &str) -> Option<u32> {
        parse_relation(s).unwrap().degree()
    }

    #[test]
    fn implicit_multiplication() {
        assert_eq!(parse_expr("5x").unwrap().to_string(), "5*x");
        assert_eq!(parse_expr("2(x+1)").unwrap().to_string(), "2*(x + 1)");
        assert_eq!(parse_expr("(x-2)(x-3)").unwrap().to_string(), "(x - 2)*(x - 3)");
        assert_eq!(parse_expr("xy").unwrap().to_string(), "x*y");
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(parse_expr("1 - 2 - 3").unwrap().constant_value(), Some(-4.0));
        assert_eq!(parse_expr("2^3^2").unwrap().constant_value(), Some(512.0));
        assert_eq!(parse_expr("-2^2").unwrap().constant_value(), Some(-4.0));
        assert_eq!(parse_expr("8 / 4 / 2").unwrap().constant_value(), Some(1.0));
        assert_eq!(parse_expr("2**3").unwrap().constant_value(), Some(8.0));
    }

    #[test]
    fn display_roundtrips_structure() {
        for s in ["x - (y - z)", "a/(b*c)", "(x + 1)^2", "x^2 - 5*x + 6", "-(x + 1)"] {
            let e = parse_expr(s).unwrap();
            assert_eq!(parse_expr(&e.to_string()).unwrap(), e, "{s}");
        }
    }

    #[test]
    fn polynomial_degrees() {
        assert_eq!(deg("x^2 - 5x + 6 = 0"), Some(2));
        assert_eq!(deg("(x - 2)(x - 3) = 0"), Some(2));
        assert_eq!(deg("(x^2 + 1)^3"), Some(6));
        assert_eq!(deg("3xy + 2"), Some(2));
        assert_eq!(deg("x^2/2"), Some(2));
        assert_eq!(deg("7"), Some(0));
        assert_eq!(deg("2^x"), None);
        assert_eq!(deg("1/x"), None);
        assert_eq!(deg("sin(x)"), None);
        assert_eq!(deg("sqrt(2) x"), Some(1));
    }

    #[test]
    fn functions_and_constants() {
        let v = parse_expr("sqrt(16) + abs(-3)").unwrap().constant_value().unwrap();
        assert!((v - 7.0).abs() < 1e-12);
        let v = parse_expr("2pi").unwrap().constant_value().unwrap();
        assert!((v - std::f64::consts::TAU).abs() < 1e-12);
        assert_eq!(parse_expr("sinx").unwrap(), Expr::Call("sin".into(), vec![Expr::Var("x".into())]));
        assert_eq!(parse_expr("log(2, 8)").unwrap().constant_value(), None);
    }

    #[test]
    fn long_words_are_single_names() {
        assert_eq!(parse_expr("speed*time").unwrap().variables().len(), 2);
        assert_eq!(parse_expr("x1 + x2").unwrap().to_string(), "x1 + x2");
    }

    #[test]
    fn relations() {
        let r = parse_relation("0 < x <= 1").unwrap();
        assert_eq!(r.ops, vec![RelOp::Lt, RelOp::Le]);
        assert_eq!(r.sides.len(), 3);
        let r = parse_relation("x != 0").unwrap();
        assert_eq!(r.ops, vec![RelOp::Ne]);
        assert!(r.sides[1].is_zero());
        assert_eq!(parse_expr("x = 1").unwrap_err(), ExprError::UnexpectedRelation);
    }

    #[test]
    fn denominators_and_factors() {
        let e = parse_expr("(x + 1)/(x(x - 1)) + 3/y").unwrap();
        let dens: Vec<String> = e.denominators().iter().map(|d| d.to_string()).collect();
        assert_eq!(dens, vec!["x*(x - 1)", "y"]);
        let factors: Vec<String> = parse_expr("3x(x-1)^2")
            .unwrap()
            .factors()
            .iter()
            .map(|f| f.to_string())
            .collect();
        assert_eq!(factors, vec!["3", "x", "x - 1"]);
        let e = parse_expr("x^-1").unwrap();
        assert_eq!(e.denominators()[0].to_string(), "x");
    }

    #[test]
    fn errors() {
        assert_eq!(parse_expr("").unwrap_err(), ExprError::Empty);
        assert_eq!(parse_expr("x +").unwrap_err(), ExprError::UnexpectedEnd);
        assert_eq!(parse_expr("(x + 1").unwrap_err(), ExprError::UnexpectedEnd);
        assert_eq!(parse_expr("x # 2").unwrap_err(), ExprError::UnexpectedChar('#'));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
    }

    #[test]
    fn alternatives_split() {
        assert_eq!(split_alternatives("x = 2 or x = 3"), vec!["x = 2", "x = 3"]);
        assert_eq!(split_alternatives("x=2, x=3; x=4"), vec!["x=2", "x=3", "x=4"]);
        assert_eq!(parse_alternatives("x = 2 and y = 1").len(), 2);
    }

    #[test]
    fn segments_from_prose() {
        assert_eq!(math_segments("Solve x^2 - 5x + 6 = 0"), vec!["x^2 - 5x + 6 = 0"]);
        assert_eq!(
            math_segments("If x + y = 10 and x - y = 2, find x."),
            vec!["x + y = 10", "x - y = 2"]
        );
        assert!(math_segments("Find the area of a circle").is_empty());
        assert_eq!(statement_degree("Solve x^3 - x = 0 for real x"), 3);
        assert_eq!(statement_degree("Find sqrt(x) for all x"), 0);
    }
}
