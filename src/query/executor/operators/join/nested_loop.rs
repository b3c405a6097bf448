use crate::catalog::{DataValue, Expression, Schema};
use crate::common::types::Rid;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::operators::join::JoinType;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Nested loop join: the outer (left) side is materialized up front; the
/// inner side is re-initialized and swept for every outer tuple. LEFT joins
/// emit a NULL-padded row for outer tuples with no match.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Expression,
    join_type: JoinType,
    left_schema: Schema,
    right_schema: Schema,
    outer: Vec<Tuple>,
    outer_pos: usize,
    right_open: bool,
    matched: bool,
}

impl NestedLoopJoinExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Expression,
        join_type: JoinType,
        left_schema: Schema,
        right_schema: Schema,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            join_type,
            left_schema,
            right_schema,
            outer: Vec::new(),
            outer_pos: 0,
            right_open: false,
            matched: false,
        }
    }

    fn joined(&self, left_tuple: &Tuple, right_tuple: &Tuple) -> Tuple {
        let mut values = left_tuple.values().to_vec();
        values.extend(right_tuple.values().iter().cloned());
        Tuple::new(values)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;

        // Materialize the outer side
        self.outer.clear();
        while let Some((tuple, _)) = self.left.next()? {
            self.outer.push(tuple);
        }
        self.outer_pos = 0;
        self.right_open = false;
        self.matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            if self.outer_pos >= self.outer.len() {
                return Ok(None);
            }

            if !self.right_open {
                self.right.init()?;
                self.right_open = true;
                self.matched = false;
            }

            match self.right.next()? {
                Some((right_tuple, _)) => {
                    let verdict = self.predicate.evaluate_join(
                        &self.outer[self.outer_pos],
                        &self.left_schema,
                        &right_tuple,
                        &self.right_schema,
                    );
                    if verdict.is_true() {
                        self.matched = true;
                        let joined = self.joined(&self.outer[self.outer_pos], &right_tuple);
                        return Ok(Some((joined, Rid::INVALID)));
                    }
                }
                None => {
                    // Inner side exhausted for this outer tuple
                    let pad = self.join_type == JoinType::Left && !self.matched;
                    let outer_tuple = self.outer[self.outer_pos].clone();
                    self.outer_pos += 1;
                    self.right_open = false;

                    if pad {
                        let mut values = outer_tuple.into_values();
                        values.extend(
                            std::iter::repeat(DataValue::Null).take(self.right_schema.len()),
                        );
                        return Ok(Some((Tuple::new(values), Rid::INVALID)));
                    }
                }
            }
        }
    }
}
