//! Deterministic arithmetic for delegated plan steps.
//!
//! Purely numeric expressions are parsed with the crate's own expression
//! scanner, re-emitted in `evalexpr` syntax (float literals, `math::`
//! functions) and evaluated there. Anything that mentions a variable is
//! refused so the caller can hand the step to the reasoner instead.

use evalexpr::Value;
use thiserror::Error;

use crate::expression::{self, BinOp, Expr, ExprError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("cannot parse expression: {0}")]
    Parse(#[from] ExprError),

    #[error("expression is not numeric: mentions {0}")]
    Symbolic(String),

    #[error("unsupported function '{0}'")]
    UnsupportedFunction(String),

    #[error("evaluation failed: {0}")]
    Eval(String),

    #[error("result is not a finite number")]
    NotFinite,
}

/// Whether `text` parses to an expression with no variables.
pub fn is_numeric(text: &str) -> bool {
    strip_trailing_equals(text)
        .and_then(|t| expression::parse_expr(t).ok())
        .is_some_and(|e| !e.has_variables())
}

/// Evaluate a numeric expression and render the result.
pub fn evaluate(text: &str) -> Result<String, CalcError> {
    let text = strip_trailing_equals(text).ok_or(ExprError::Empty)?;
    let expr = expression::parse_expr(text)?;
    let vars = expr.variables();
    if !vars.is_empty() {
        return Err(CalcError::Symbolic(
            vars.into_iter().collect::<Vec<_>>().join(", "),
        ));
    }

    let source = to_evalexpr(&expr)?;
    let value = evalexpr::eval(&source).map_err(|e| CalcError::Eval(e.to_string()))?;
    let number = match value {
        Value::Float(f) => f,
        Value::Int(i) => i as f64,
        other => return Err(CalcError::Eval(format!("non-numeric result {other}"))),
    };
    if !number.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(expression::format_number(number))
}

/// `"1234 * 5678 ="` is a common way to ask for a value.
fn strip_trailing_equals(text: &str) -> Option<&str> {
    let trimmed = text.trim().trim_end_matches('=').trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn float_literal(v: f64) -> String {
    let s = v.to_string();
    if s.contains('.') { s } else { format!("{s}.0") }
}

fn to_evalexpr(expr: &Expr) -> Result<String, CalcError> {
    Ok(match expr {
        Expr::Num(n) => float_literal(*n),
        Expr::Var(v) => return Err(CalcError::Symbolic(v.clone())),
        Expr::Neg(e) => format!("(-{})", to_evalexpr(e)?),
        Expr::Bin(op, l, r) => {
            let sym = match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
                BinOp::Pow => "^",
            };
            format!("({} {sym} {})", to_evalexpr(l)?, to_evalexpr(r)?)
        }
        Expr::Call(name, args) => {
            let [arg] = args.as_slice() else {
                return Err(CalcError::UnsupportedFunction(format!("{name}/{}", args.len())));
            };
            let a = to_evalexpr(arg)?;
            match name.as_str() {
                "sqrt" | "cbrt" | "sin" | "cos" | "tan" | "sinh" | "cosh" | "tanh" | "ln"
                | "exp" | "log10" => format!("math::{name}({a})"),
                "arcsin" => format!("math::asin({a})"),
                "arccos" => format!("math::acos({a})"),
                "arctan" => format!("math::atan({a})"),
                "log" => format!("math::log10({a})"),
                "abs" => format!("math::sqrt({a} ^ 2.0)"),
                "cot" => format!("(1.0 / math::tan({a}))"),
                "sec" => format!("(1.0 / math::cos({a}))"),
                "csc" => format!("(1.0 / math::sin({a}))"),
                other => return Err(CalcError::UnsupportedFunction(other.to_string())),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_is_exact() {
        assert_eq!(evaluate("1234 * 5678").unwrap(), "7006652");
        assert_eq!(evaluate("2^10 + 5").unwrap(), "1029");
        assert_eq!(evaluate("(3 + 4)(2)").unwrap(), "14");
    }

    #[test]
    fn division_is_not_integer_division() {
        assert_eq!(evaluate("7 / 2").unwrap(), "3.5");
        assert_eq!(evaluate("1/3").unwrap(), "0.3333333333");
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(evaluate("sqrt(144)").unwrap(), "12");
        assert_eq!(evaluate("abs(-4.5)").unwrap(), "4.5");
        assert_eq!(evaluate("sin(0) + cos(0)").unwrap(), "1");
        assert_eq!(evaluate("2 pi / pi").unwrap(), "2");
    }

    #[test]
    fn trailing_equals_is_ignored() {
        assert_eq!(evaluate("12 * 12 =").unwrap(), "144");
        assert!(is_numeric("12 * 12 ="));
    }

    #[test]
    fn symbolic_input_is_refused() {
        assert!(matches!(evaluate("2x + 1"), Err(CalcError::Symbolic(v)) if v == "x"));
        assert!(!is_numeric("x^2"));
        assert!(!is_numeric(""));
    }

    #[test]
    fn non_finite_results_are_errors() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("sqrt(-1)").is_err());
    }
}
