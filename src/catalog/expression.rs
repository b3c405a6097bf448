use serde::{Deserialize, Serialize};

use crate::catalog::schema::Schema;
use crate::catalog::value::DataValue;
use crate::storage::table::tuple::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Plus,
    Minus,
}

/// An executor-facing expression tree. Column references are resolved by
/// position; in a join context the positions run left schema first, then
/// right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Value of the column at the given schema position
    Column(usize),
    /// A literal constant
    Literal(DataValue),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::Column(index)
    }

    pub fn literal(value: DataValue) -> Self {
        Expression::Literal(value)
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Evaluate against a single tuple. Type mismatches yield NULL, which
    /// predicates treat as false.
    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> DataValue {
        match self {
            Expression::Column(index) => tuple.value(*index).clone(),
            Expression::Literal(value) => value.clone(),
            Expression::BinaryOp { left, op, right } => {
                let lhs = left.evaluate(tuple, schema);
                let rhs = right.evaluate(tuple, schema);
                apply_binary(&lhs, *op, &rhs)
            }
        }
    }

    /// Evaluate against a pair of tuples; column positions index the
    /// concatenation of the left and right schemas.
    pub fn evaluate_join(
        &self,
        left_tuple: &Tuple,
        left_schema: &Schema,
        right_tuple: &Tuple,
        right_schema: &Schema,
    ) -> DataValue {
        match self {
            Expression::Column(index) => {
                if *index < left_schema.len() {
                    left_tuple.value(*index).clone()
                } else {
                    right_tuple.value(*index - left_schema.len()).clone()
                }
            }
            Expression::Literal(value) => value.clone(),
            Expression::BinaryOp { left, op, right } => {
                let lhs = left.evaluate_join(left_tuple, left_schema, right_tuple, right_schema);
                let rhs = right.evaluate_join(left_tuple, left_schema, right_tuple, right_schema);
                apply_binary(&lhs, *op, &rhs)
            }
        }
    }
}

fn apply_binary(lhs: &DataValue, op: BinaryOperator, rhs: &DataValue) -> DataValue {
    use BinaryOperator::*;

    if lhs.is_null() || rhs.is_null() {
        return DataValue::Null;
    }

    match op {
        Equals => DataValue::Boolean(lhs == rhs),
        NotEquals => DataValue::Boolean(lhs != rhs),
        LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            match lhs.partial_cmp(rhs) {
                Some(ordering) => DataValue::Boolean(match op {
                    LessThan => ordering.is_lt(),
                    LessThanOrEqual => ordering.is_le(),
                    GreaterThan => ordering.is_gt(),
                    GreaterThanOrEqual => ordering.is_ge(),
                    _ => unreachable!(),
                }),
                None => DataValue::Null,
            }
        }
        And => match (lhs, rhs) {
            (DataValue::Boolean(a), DataValue::Boolean(b)) => DataValue::Boolean(*a && *b),
            _ => DataValue::Null,
        },
        Or => match (lhs, rhs) {
            (DataValue::Boolean(a), DataValue::Boolean(b)) => DataValue::Boolean(*a || *b),
            _ => DataValue::Null,
        },
        Plus => match (lhs, rhs) {
            (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a + b),
            (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
            (DataValue::Integer(a), DataValue::Float(b)) => DataValue::Float(*a as f64 + b),
            (DataValue::Float(a), DataValue::Integer(b)) => DataValue::Float(a + *b as f64),
            _ => DataValue::Null,
        },
        Minus => match (lhs, rhs) {
            (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a - b),
            (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a - b),
            (DataValue::Integer(a), DataValue::Float(b)) => DataValue::Float(*a as f64 - b),
            (DataValue::Float(a), DataValue::Integer(b)) => DataValue::Float(a - *b as f64),
            _ => DataValue::Null,
        },
    }
}
