//! Expression AST over device-reported quantities
//!
//! An `Expression` is an ordered infix sequence of `Term` tokens: literals,
//! device-value references, and operators (including parenthesis markers).
//! The evaluator in [`eval`] walks the sequence with standard precedence to
//! type-check it, reduce it to a preview value, or render it as C source.

pub mod eval;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::Quantity;

/// Closed operator set usable in conditions and settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Plus,
    Minus,
    Multiply,
    Divide,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    And,
    Or,
    Not,
    OpenParen,
    CloseParen,
}

impl Operator {
    /// Symbol shown in the editor UI
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "x",
            Operator::Divide => "/",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => "\u{2265}",
            Operator::LessOrEqual => "\u{2264}",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
            Operator::OpenParen => "(",
            Operator::CloseParen => ")",
        }
    }

    /// Symbol emitted into generated C source
    pub fn c_symbol(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::OpenParen => "(",
            Operator::CloseParen => ")",
        }
    }

    /// Binding strength; higher binds tighter. Parentheses are handled
    /// structurally and have no precedence of their own.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            Operator::Not => 5,
            Operator::Multiply | Operator::Divide => 4,
            Operator::Plus | Operator::Minus => 3,
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterOrEqual
            | Operator::LessOrEqual => 2,
            Operator::And => 1,
            Operator::Or => 0,
            Operator::OpenParen | Operator::CloseParen => 0,
        }
    }

    pub(crate) fn is_unary(self) -> bool {
        matches!(self, Operator::Not)
    }

    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::LessThan
                | Operator::GreaterOrEqual
                | Operator::LessOrEqual
        )
    }

    pub(crate) fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
        )
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One token of an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "term", rename_all = "snake_case")]
pub enum Term {
    /// Numeric literal with its unit
    Number(Quantity),
    /// String literal (categorical settings)
    Text(String),
    /// Reading of a bound device's reported value
    ValueRef { device: String, property: String },
    /// Operator or parenthesis marker
    Op(Operator),
}

impl Term {
    pub fn number(value: f64, unit: crate::units::Unit) -> Self {
        Term::Number(Quantity::new(value, unit))
    }

    pub fn unitless(value: f64) -> Self {
        Term::Number(Quantity::unitless(value))
    }

    pub fn value_ref(device: impl Into<String>, property: impl Into<String>) -> Self {
        Term::ValueRef {
            device: device.into(),
            property: property.into(),
        }
    }
}

/// Typed failures from expression checking, evaluation, and rendering
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ExpressionError {
    #[error("operator '{operator}' applied to incompatible operands: {detail}")]
    TypeMismatch { operator: String, detail: String },

    #[error("malformed expression: {detail}")]
    UnbalancedExpression { detail: String },

    #[error("unknown value reference '{device}.{property}'")]
    UnknownReference { device: String, property: String },
}

/// Ordered infix token sequence forming one condition or setting expression
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Expression(pub Vec<Term>);

impl Expression {
    pub fn new(terms: impl IntoIterator<Item = Term>) -> Self {
        Self(terms.into_iter().collect())
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reconstruct how the editor would display the expression
    pub fn display_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.0.len());
        for term in &self.0 {
            parts.push(match term {
                Term::Number(q) => q.to_string(),
                Term::Text(s) => format!("\"{s}\""),
                Term::ValueRef { device, property } => format!("{device}.{property}"),
                Term::Op(op) => op.symbol().to_string(),
            });
        }
        parts.join(" ")
    }
}

impl From<Vec<Term>> for Expression {
    fn from(terms: Vec<Term>) -> Self {
        Self(terms)
    }
}
