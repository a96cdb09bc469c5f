//! Expression checking, reduction, and C-source rendering
//!
//! All three passes share one infix-to-postfix conversion (shunting-yard with
//! the operator precedence from [`Operator::precedence`]); the passes differ
//! only in what they push on the operand stack: types, values, or rendered
//! source fragments.

use crate::term::{Expression, ExpressionError, Operator, Term};
use crate::units::{Quantity, Unit, UnitFamily};

/// Result type of a checked expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    Number(UnitFamily),
    Bool,
    Text,
}

/// Concrete result of a design-time preview evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Number(Quantity),
    Bool(bool),
    Text(String),
}

/// Postfix token: operand by reference, operator by value
enum PostTok<'a> {
    Operand(&'a Term),
    Op(Operator),
}

fn unbalanced(detail: &str) -> ExpressionError {
    ExpressionError::UnbalancedExpression {
        detail: detail.to_string(),
    }
}

fn mismatch(op: Operator, detail: impl Into<String>) -> ExpressionError {
    ExpressionError::TypeMismatch {
        operator: op.symbol().to_string(),
        detail: detail.into(),
    }
}

/// Convert the infix token sequence to postfix order.
///
/// Binary operators of equal precedence associate left; the unary `not`
/// associates right. Parenthesis mismatches surface here.
fn to_postfix(terms: &[Term]) -> Result<Vec<PostTok<'_>>, ExpressionError> {
    if terms.is_empty() {
        return Err(unbalanced("empty expression"));
    }

    let mut output: Vec<PostTok<'_>> = Vec::with_capacity(terms.len());
    let mut stack: Vec<Operator> = Vec::new();

    for term in terms {
        match term {
            Term::Number(_) | Term::Text(_) | Term::ValueRef { .. } => {
                output.push(PostTok::Operand(term));
            }
            Term::Op(Operator::OpenParen) => stack.push(Operator::OpenParen),
            Term::Op(Operator::CloseParen) => loop {
                match stack.pop() {
                    Some(Operator::OpenParen) => break,
                    Some(op) => output.push(PostTok::Op(op)),
                    None => return Err(unbalanced("')' without matching '('")),
                }
            },
            Term::Op(current) => {
                while let Some(&top) = stack.last() {
                    if top == Operator::OpenParen {
                        break;
                    }
                    // Pop equal precedence for left-associative binary ops;
                    // keep it for the right-associative unary `not`
                    let pops = if current.is_unary() {
                        top.precedence() > current.precedence()
                    } else {
                        top.precedence() >= current.precedence()
                    };
                    if !pops {
                        break;
                    }
                    stack.pop();
                    output.push(PostTok::Op(top));
                }
                stack.push(*current);
            }
        }
    }

    while let Some(op) = stack.pop() {
        if op == Operator::OpenParen {
            return Err(unbalanced("'(' without matching ')'"));
        }
        output.push(PostTok::Op(op));
    }

    Ok(output)
}

/// Two numeric operands aligned to one unit (right converted into left's
/// unit; `NOT_SPECIFIED` adopts the other side's unit)
fn align(op: Operator, left: Quantity, right: Quantity) -> Result<(f64, f64, Unit), ExpressionError> {
    if left.unit == right.unit {
        return Ok((left.value, right.value, left.unit));
    }
    if left.unit == Unit::NotSpecified {
        return Ok((left.value, right.value, right.unit));
    }
    if right.unit == Unit::NotSpecified {
        return Ok((left.value, right.value, left.unit));
    }
    let converted = right
        .convert_to(left.unit)
        .map_err(|e| mismatch(op, e.to_string()))?;
    Ok((left.value, converted.value, left.unit))
}

fn unify_families(a: UnitFamily, b: UnitFamily) -> Option<UnitFamily> {
    if a == b {
        Some(a)
    } else if a == UnitFamily::NotSpecified {
        Some(b)
    } else if b == UnitFamily::NotSpecified {
        Some(a)
    } else {
        None
    }
}

impl Expression {
    /// Type/unit check without evaluating.
    ///
    /// `ref_unit` resolves a device-value reference to its reported unit;
    /// returning `None` makes the reference an `UnknownReference` error.
    pub fn check(
        &self,
        ref_unit: impl Fn(&str, &str) -> Option<Unit>,
    ) -> Result<OperandType, ExpressionError> {
        let postfix = to_postfix(&self.0)?;
        let mut stack: Vec<OperandType> = Vec::new();

        for tok in postfix {
            match tok {
                PostTok::Operand(Term::Number(q)) => {
                    stack.push(OperandType::Number(q.unit.family()))
                }
                PostTok::Operand(Term::Text(_)) => stack.push(OperandType::Text),
                PostTok::Operand(Term::ValueRef { device, property }) => {
                    let unit = ref_unit(device, property).ok_or_else(|| {
                        ExpressionError::UnknownReference {
                            device: device.clone(),
                            property: property.clone(),
                        }
                    })?;
                    stack.push(OperandType::Number(unit.family()));
                }
                PostTok::Operand(Term::Op(_)) => unreachable!("operators are not operands"),
                PostTok::Op(op) if op.is_unary() => {
                    let operand = stack
                        .pop()
                        .ok_or_else(|| unbalanced("'not' without an operand"))?;
                    match operand {
                        OperandType::Bool => stack.push(OperandType::Bool),
                        other => {
                            return Err(mismatch(op, format!("expected boolean, got {other:?}")))
                        }
                    }
                }
                PostTok::Op(op) => {
                    let right = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing right operand"))?;
                    let left = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing left operand"))?;
                    stack.push(check_binary(op, left, right)?);
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(result), true) => Ok(result),
            (Some(_), false) => Err(unbalanced("leftover operands after evaluation")),
            (None, _) => Err(unbalanced("expression reduces to nothing")),
        }
    }

    /// Reduce to a concrete value for design-time preview.
    ///
    /// `values` supplies the current reading of each referenced device value.
    pub fn evaluate(
        &self,
        values: impl Fn(&str, &str) -> Option<Quantity>,
    ) -> Result<EvalValue, ExpressionError> {
        let postfix = to_postfix(&self.0)?;
        let mut stack: Vec<EvalValue> = Vec::new();

        for tok in postfix {
            match tok {
                PostTok::Operand(Term::Number(q)) => stack.push(EvalValue::Number(*q)),
                PostTok::Operand(Term::Text(s)) => stack.push(EvalValue::Text(s.clone())),
                PostTok::Operand(Term::ValueRef { device, property }) => {
                    let q = values(device, property).ok_or_else(|| {
                        ExpressionError::UnknownReference {
                            device: device.clone(),
                            property: property.clone(),
                        }
                    })?;
                    stack.push(EvalValue::Number(q));
                }
                PostTok::Operand(Term::Op(_)) => unreachable!("operators are not operands"),
                PostTok::Op(op) if op.is_unary() => {
                    let operand = stack
                        .pop()
                        .ok_or_else(|| unbalanced("'not' without an operand"))?;
                    match operand {
                        EvalValue::Bool(b) => stack.push(EvalValue::Bool(!b)),
                        other => {
                            return Err(mismatch(op, format!("expected boolean, got {other:?}")))
                        }
                    }
                }
                PostTok::Op(op) => {
                    let right = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing right operand"))?;
                    let left = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing left operand"))?;
                    stack.push(eval_binary(op, left, right)?);
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(result), true) => Ok(result),
            (Some(_), false) => Err(unbalanced("leftover operands after evaluation")),
            (None, _) => Err(unbalanced("expression reduces to nothing")),
        }
    }

    /// Render an equivalent C fragment.
    ///
    /// `accessor` maps a device-value reference to the generator's runtime
    /// accessor expression for it. Sub-expressions are parenthesized so the
    /// emitted fragment keeps this AST's evaluation order regardless of the
    /// target compiler's parsing.
    pub fn render_c(
        &self,
        accessor: impl Fn(&str, &str) -> Option<String>,
    ) -> Result<String, ExpressionError> {
        let postfix = to_postfix(&self.0)?;
        let mut stack: Vec<String> = Vec::new();

        for tok in postfix {
            match tok {
                PostTok::Operand(Term::Number(q)) => stack.push(render_number(q.value)),
                PostTok::Operand(Term::Text(s)) => {
                    stack.push(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
                }
                PostTok::Operand(Term::ValueRef { device, property }) => {
                    let access = accessor(device, property).ok_or_else(|| {
                        ExpressionError::UnknownReference {
                            device: device.clone(),
                            property: property.clone(),
                        }
                    })?;
                    stack.push(access);
                }
                PostTok::Operand(Term::Op(_)) => unreachable!("operators are not operands"),
                PostTok::Op(op) if op.is_unary() => {
                    let operand = stack
                        .pop()
                        .ok_or_else(|| unbalanced("'not' without an operand"))?;
                    stack.push(format!("{}{}", op.c_symbol(), operand));
                }
                PostTok::Op(op) => {
                    let right = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing right operand"))?;
                    let left = stack
                        .pop()
                        .ok_or_else(|| unbalanced("operator missing left operand"))?;
                    stack.push(format!("({} {} {})", left, op.c_symbol(), right));
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(result), true) => Ok(result),
            (Some(_), false) => Err(unbalanced("leftover operands after evaluation")),
            (None, _) => Err(unbalanced("expression reduces to nothing")),
        }
    }
}

fn check_binary(
    op: Operator,
    left: OperandType,
    right: OperandType,
) -> Result<OperandType, ExpressionError> {
    if op.is_arithmetic() || op.is_comparison() {
        let (lf, rf) = match (left, right) {
            (OperandType::Number(lf), OperandType::Number(rf)) => (lf, rf),
            (l, r) => {
                return Err(mismatch(op, format!("expected numbers, got {l:?} and {r:?}")));
            }
        };
        let family = unify_families(lf, rf)
            .ok_or_else(|| mismatch(op, format!("unit families {lf:?} and {rf:?} do not mix")))?;
        if op.is_arithmetic() {
            Ok(OperandType::Number(family))
        } else {
            Ok(OperandType::Bool)
        }
    } else {
        // and / or
        match (left, right) {
            (OperandType::Bool, OperandType::Bool) => Ok(OperandType::Bool),
            (l, r) => Err(mismatch(op, format!("expected booleans, got {l:?} and {r:?}"))),
        }
    }
}

fn eval_binary(op: Operator, left: EvalValue, right: EvalValue) -> Result<EvalValue, ExpressionError> {
    if op.is_arithmetic() || op.is_comparison() {
        let (l, r) = match (left, right) {
            (EvalValue::Number(l), EvalValue::Number(r)) => (l, r),
            (l, r) => {
                return Err(mismatch(op, format!("expected numbers, got {l:?} and {r:?}")));
            }
        };
        let (lv, rv, unit) = align(op, l, r)?;
        Ok(match op {
            Operator::Plus => EvalValue::Number(Quantity::new(lv + rv, unit)),
            Operator::Minus => EvalValue::Number(Quantity::new(lv - rv, unit)),
            Operator::Multiply => EvalValue::Number(Quantity::new(lv * rv, unit)),
            Operator::Divide => EvalValue::Number(Quantity::new(lv / rv, unit)),
            Operator::GreaterThan => EvalValue::Bool(lv > rv),
            Operator::LessThan => EvalValue::Bool(lv < rv),
            Operator::GreaterOrEqual => EvalValue::Bool(lv >= rv),
            Operator::LessOrEqual => EvalValue::Bool(lv <= rv),
            _ => unreachable!("checked arithmetic/comparison set"),
        })
    } else {
        match (left, right) {
            (EvalValue::Bool(l), EvalValue::Bool(r)) => Ok(match op {
                Operator::And => EvalValue::Bool(l && r),
                Operator::Or => EvalValue::Bool(l || r),
                _ => unreachable!("checked logical set"),
            }),
            (l, r) => Err(mismatch(op, format!("expected booleans, got {l:?} and {r:?}"))),
        }
    }
}

/// Deterministic C literal for an f64 (shortest round-trip form)
fn render_number(value: f64) -> String {
    format!("{value}")
}
