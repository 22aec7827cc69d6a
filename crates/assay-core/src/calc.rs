//! Arithmetic expression evaluation and tolerance comparison.
//!
//! Numerical and formula graders evaluate both the learner's expression and
//! the authored answer with [`evaluate`], then compare them with a
//! [`Tolerance`].
//!
//! ## Syntax
//!
//! - Binary operators `+ - * / ^`; `^` is right-associative and binds tighter
//!   than unary sign, so `-2^2` is `-4`
//! - Parentheses
//! - Numbers with an optional exponent and an optional scale suffix
//!   (`%`, `k`, `M`, `G`, `T`, `c`, `m`, `u`, `n`, `p`), e.g. `4.7k`
//! - Single-argument functions: trigonometric, inverse, hyperbolic, `sqrt`,
//!   `log10`, `log2`, `ln`, `exp`, `abs`, `fact`, `factorial`
//! - Constants `e`, `pi`, `g`, `c`, `q`, `k`, `T`, overridable by variables

use std::collections::BTreeMap;
use thiserror::Error;

/// Tolerance applied when an author does not give one.
pub const DEFAULT_TOLERANCE: &str = "0.001%";

/// Errors from expression evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("Invalid input: {0} not permitted in answer as a variable")]
    UndefinedVariable(String),

    #[error("Invalid input: {0} not permitted in answer as a function")]
    UndefinedFunction(String),

    #[error("Invalid input: parentheses are unmatched")]
    UnmatchedParenthesis,

    #[error("Invalid math syntax: '{0}'")]
    Syntax(String),

    #[error("Math domain error in {0}")]
    Domain(String),

    #[error("Empty expression")]
    Empty,
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn suffix_scale(c: char) -> Option<f64> {
    match c {
        '%' => Some(0.01),
        'k' => Some(1e3),
        'M' => Some(1e6),
        'G' => Some(1e9),
        'T' => Some(1e12),
        'c' => Some(1e-2),
        'm' => Some(1e-3),
        'u' => Some(1e-6),
        'n' => Some(1e-9),
        'p' => Some(1e-12),
        _ => None,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(expr: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent only when digits follow, so `2e` stays a syntax error.
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let mut value: f64 = literal
                .parse()
                .map_err(|_| CalcError::Syntax(expr.to_string()))?;

            if let Some(scale) = chars.get(i).and_then(|s| suffix_scale(*s)) {
                let standalone = chars.get(i + 1).map_or(true, |n| !is_ident_char(*n));
                if standalone {
                    value *= scale;
                    i += 1;
                }
            }
            tokens.push(Token::Number(value));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        match c {
            '+' | '-' | '*' | '/' | '^' => tokens.push(Token::Op(c)),
            '(' | '[' => tokens.push(Token::LParen),
            ')' | ']' => tokens.push(Token::RParen),
            _ => return Err(CalcError::Syntax(expr.to_string())),
        }
        i += 1;
    }

    Ok(tokens)
}

// ============================================================================
// Parser / evaluator
// ============================================================================

struct Evaluator<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    variables: BTreeMap<String, f64>,
    case_sensitive: bool,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn syntax(&self) -> CalcError {
        CalcError::Syntax(self.source.to_string())
    }

    fn key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = if op == '*' { value * rhs } else { value / rhs };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(CalcError::UnmatchedParenthesis),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.expr()?;
                    match self.next() {
                        Some(Token::RParen) => {}
                        _ => return Err(CalcError::UnmatchedParenthesis),
                    }
                    return apply_function(&self.key(&name), &name, arg);
                }
                self.variables
                    .get(&self.key(&name))
                    .copied()
                    .ok_or(CalcError::UndefinedVariable(name))
            }
            Some(Token::RParen) => Err(CalcError::UnmatchedParenthesis),
            _ => Err(self.syntax()),
        }
    }
}

fn apply_function(key: &str, name: &str, x: f64) -> Result<f64, CalcError> {
    let value = match key {
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "sec" => 1.0 / x.cos(),
        "csc" => 1.0 / x.sin(),
        "cot" => 1.0 / x.tan(),
        "arcsin" => x.asin(),
        "arccos" => x.acos(),
        "arctan" => x.atan(),
        "sinh" => x.sinh(),
        "cosh" => x.cosh(),
        "tanh" => x.tanh(),
        "sqrt" => x.sqrt(),
        "log10" => x.log10(),
        "log2" => x.log2(),
        "ln" => x.ln(),
        "exp" => x.exp(),
        "abs" => x.abs(),
        "fact" | "factorial" => factorial(x).ok_or_else(|| CalcError::Domain(name.to_string()))?,
        _ => return Err(CalcError::UndefinedFunction(name.to_string())),
    };
    if value.is_nan() {
        return Err(CalcError::Domain(name.to_string()));
    }
    Ok(value)
}

fn factorial(x: f64) -> Option<f64> {
    if x < 0.0 || x.fract() != 0.0 || x > 170.0 {
        return None;
    }
    Some((1..=x as u32).fold(1.0, |acc, n| acc * n as f64))
}

fn default_constants() -> [(&'static str, f64); 7] {
    [
        ("e", std::f64::consts::E),
        ("pi", std::f64::consts::PI),
        ("g", 9.80665),
        ("c", 2.998e8),
        ("q", 1.602176565e-19),
        ("k", 1.3806488e-23),
        ("T", 298.15),
    ]
}

/// Evaluate an expression.
///
/// # Arguments
///
/// * `expr` - The expression text
/// * `variables` - Bound variables; these shadow the built-in constants
/// * `case_sensitive` - Whether names are matched case-sensitively
pub fn evaluate(
    expr: &str,
    variables: &BTreeMap<String, f64>,
    case_sensitive: bool,
) -> Result<f64, CalcError> {
    if expr.trim().is_empty() {
        return Err(CalcError::Empty);
    }

    let fold = |name: &str| {
        if case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    };

    let mut bound = BTreeMap::new();
    for (name, value) in default_constants() {
        bound.insert(fold(name), value);
    }
    for (name, value) in variables {
        bound.insert(fold(name), *value);
    }

    let mut evaluator = Evaluator {
        source: expr,
        tokens: tokenize(expr)?,
        pos: 0,
        variables: bound,
        case_sensitive,
    };

    let value = evaluator.expr()?;
    match evaluator.peek() {
        None => Ok(value),
        Some(Token::RParen) => Err(CalcError::UnmatchedParenthesis),
        Some(_) => Err(evaluator.syntax()),
    }
}

// ============================================================================
// Tolerance
// ============================================================================

/// Allowed distance between a learner value and the authored value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Fraction of the larger magnitude of the two values.
    Relative(f64),
    /// Fraction of the authored value's magnitude.
    Percent(f64),
    Absolute(f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Relative(0.001 * 0.01)
    }
}

impl Tolerance {
    /// Parse an authored tolerance such as `0.01`, `5%`, or `1e-3`.
    pub fn parse(text: &str) -> Result<Self, CalcError> {
        let text = text.trim();
        if text == DEFAULT_TOLERANCE {
            return Ok(Tolerance::default());
        }
        match text.strip_suffix('%') {
            Some(percent) => Ok(Tolerance::Percent(
                evaluate(percent, &BTreeMap::new(), true)? * 0.01,
            )),
            None => Ok(Tolerance::Absolute(evaluate(text, &BTreeMap::new(), true)?)),
        }
    }

    /// Multiply the allowed distance.
    pub fn scaled(self, factor: f64) -> Self {
        match self {
            Tolerance::Relative(t) => Tolerance::Relative(t * factor),
            Tolerance::Percent(t) => Tolerance::Percent(t * factor),
            Tolerance::Absolute(t) => Tolerance::Absolute(t * factor),
        }
    }

    /// Whether `student` is within tolerance of `instructor`.
    ///
    /// Infinite values only match themselves.
    pub fn accepts(&self, student: f64, instructor: f64) -> bool {
        if student.is_infinite() || instructor.is_infinite() {
            return student == instructor;
        }
        let allowed = match *self {
            Tolerance::Relative(t) => t * student.abs().max(instructor.abs()),
            Tolerance::Percent(t) => t * instructor.abs(),
            Tolerance::Absolute(t) => t,
        };
        (student - instructor).abs() <= allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Result<f64, CalcError> {
        evaluate(expr, &BTreeMap::new(), true)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval("2^3^2").unwrap(), 512.0);
        assert_eq!(eval("-2^2").unwrap(), -4.0);
        assert_eq!(eval("2^-1").unwrap(), 0.5);
        assert_eq!(eval("8 / 4 / 2").unwrap(), 1.0);
    }

    #[test]
    fn test_suffixes_and_exponents() {
        assert!(close(eval("4.7k").unwrap(), 4700.0));
        assert!(close(eval("50%").unwrap(), 0.5));
        assert!(close(eval("3m").unwrap(), 0.003));
        assert!(close(eval("1.5e3").unwrap(), 1500.0));
        assert!(close(eval("2E-2").unwrap(), 0.02));
    }

    #[test]
    fn test_functions_and_constants() {
        assert!(close(eval("sin(pi/2)").unwrap(), 1.0));
        assert!(close(eval("sqrt(16) + abs(-2)").unwrap(), 6.0));
        assert!(close(eval("fact(5)").unwrap(), 120.0));
        assert!(close(eval("ln(e)").unwrap(), 1.0));
        assert!(matches!(eval("sqrt(-1)"), Err(CalcError::Domain(_))));
        assert!(matches!(eval("fact(2.5)"), Err(CalcError::Domain(_))));
    }

    #[test]
    fn test_variables_and_case() {
        let mut vars = BTreeMap::new();
        vars.insert("R".to_string(), 10.0);
        assert_eq!(evaluate("2*R", &vars, true).unwrap(), 20.0);
        assert!(matches!(
            evaluate("2*r", &vars, true),
            Err(CalcError::UndefinedVariable(_))
        ));
        assert_eq!(evaluate("2*r", &vars, false).unwrap(), 20.0);
        assert_eq!(evaluate("SQRT(4)", &vars, false).unwrap(), 2.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval(""), Err(CalcError::Empty));
        assert_eq!(eval("(1 + 2"), Err(CalcError::UnmatchedParenthesis));
        assert_eq!(eval("1 + 2)"), Err(CalcError::UnmatchedParenthesis));
        assert!(matches!(eval("1 +"), Err(CalcError::Syntax(_))));
        assert!(matches!(eval("3 $ 4"), Err(CalcError::Syntax(_))));
        assert!(matches!(eval("foo(1)"), Err(CalcError::UndefinedFunction(_))));
    }

    #[test]
    fn test_tolerance_kinds() {
        let default = Tolerance::default();
        assert!(default.accepts(3.14, 3.14));
        assert!(default.accepts(1000.0, 1000.005));
        assert!(!default.accepts(3.0, 3.14));

        let absolute = Tolerance::parse("0.01").unwrap();
        assert!(absolute.accepts(3.145, 3.14));
        assert!(!absolute.accepts(3.16, 3.14));

        let percent = Tolerance::parse("5%").unwrap();
        assert!(percent.accepts(104.0, 100.0));
        assert!(!percent.accepts(106.0, 100.0));
    }

    #[test]
    fn test_tolerance_infinity() {
        let tolerance = Tolerance::Absolute(1e9);
        assert!(tolerance.accepts(f64::INFINITY, f64::INFINITY));
        assert!(!tolerance.accepts(1.0, f64::INFINITY));
    }
}
