use std::cmp::Ordering;

use crate::catalog::{Expression, Schema};
use crate::common::types::Rid;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::operators::sort::{compare_tuples, OrderByType};
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Keeps only the first N rows of the child under the sort comparator,
/// partial-sorting into a buffer bounded at N entries.
pub struct TopNExecutor {
    child: Box<dyn Executor>,
    schema: Schema,
    order_by: Vec<(OrderByType, Expression)>,
    n: usize,
    output: Option<std::vec::IntoIter<(Tuple, Rid)>>,
}

impl TopNExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        schema: Schema,
        order_by: Vec<(OrderByType, Expression)>,
        n: usize,
    ) -> Self {
        Self {
            child,
            schema,
            order_by,
            n,
            output: None,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.output = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.output.is_none() {
            let mut buffer: Vec<(Tuple, Rid)> = Vec::with_capacity(self.n + 1);

            while let Some(row) = self.child.next()? {
                if self.n == 0 {
                    continue;
                }
                let position = buffer
                    .iter()
                    .position(|kept| {
                        compare_tuples(&row.0, &kept.0, &self.schema, &self.order_by)
                            == Ordering::Less
                    })
                    .unwrap_or(buffer.len());
                if position >= self.n {
                    continue;
                }
                buffer.insert(position, row);
                buffer.truncate(self.n);
            }

            self.output = Some(buffer.into_iter());
        }

        Ok(self.output.as_mut().and_then(|iter| iter.next()))
    }
}
