use std::cmp::Ordering;

use crate::catalog::{Expression, Schema};
use crate::common::types::Rid;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Sort direction for one order-by key; DEFAULT means ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Default,
    Asc,
    Desc,
}

/// Compare two tuples under an order-by list, tie-breaking left to right
pub(crate) fn compare_tuples(
    a: &Tuple,
    b: &Tuple,
    schema: &Schema,
    order_by: &[(OrderByType, Expression)],
) -> Ordering {
    for (direction, expression) in order_by {
        let va = expression.evaluate(a, schema);
        let vb = expression.evaluate(b, schema);
        let ordering = match direction {
            OrderByType::Desc => vb.compare(&va),
            OrderByType::Default | OrderByType::Asc => va.compare(&vb),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Materializes its child and sorts the rows in memory under the plan's
/// order-by list.
pub struct SortExecutor {
    child: Box<dyn Executor>,
    schema: Schema,
    order_by: Vec<(OrderByType, Expression)>,
    output: Option<std::vec::IntoIter<(Tuple, Rid)>>,
}

impl SortExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        schema: Schema,
        order_by: Vec<(OrderByType, Expression)>,
    ) -> Self {
        Self {
            child,
            schema,
            order_by,
            output: None,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.output = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.output.is_none() {
            let mut rows = Vec::new();
            while let Some(row) = self.child.next()? {
                rows.push(row);
            }
            rows.sort_by(|a, b| compare_tuples(&a.0, &b.0, &self.schema, &self.order_by));
            self.output = Some(rows.into_iter());
        }

        Ok(self.output.as_mut().and_then(|iter| iter.next()))
    }
}
