use std::sync::Arc;

use crate::catalog::{DataValue, Expression, IndexInfo, Schema, TableInfo};
use crate::common::types::{IndexOid, Rid};
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::operators::join::JoinType;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Index nested loop join: for each outer tuple the join key expression is
/// evaluated and probed against the inner table's B+ tree index. Unique
/// keys mean at most one inner match per probe.
pub struct NestedIndexJoinExecutor {
    context: Arc<ExecutorContext>,
    child: Box<dyn Executor>,
    index_oid: IndexOid,
    key_expression: Expression,
    join_type: JoinType,
    outer_schema: Schema,
    inner_schema: Schema,
    index_info: Option<Arc<IndexInfo>>,
    inner_table: Option<Arc<TableInfo>>,
}

impl NestedIndexJoinExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: Arc<ExecutorContext>,
        child: Box<dyn Executor>,
        index_oid: IndexOid,
        key_expression: Expression,
        join_type: JoinType,
        outer_schema: Schema,
        inner_schema: Schema,
    ) -> Self {
        Self {
            context,
            child,
            index_oid,
            key_expression,
            join_type,
            outer_schema,
            inner_schema,
            index_info: None,
            inner_table: None,
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;

        let (index_info, inner_table) = {
            let catalog = self.context.catalog.read();
            let index_info = catalog
                .get_index(self.index_oid)
                .ok_or(ExecutionError::IndexNotFound(self.index_oid))?;
            let inner_table = catalog
                .get_table_by_name(&index_info.table_name)
                .ok_or(ExecutionError::IndexNotFound(self.index_oid))?;
            (index_info, inner_table)
        };
        self.index_info = Some(index_info);
        self.inner_table = Some(inner_table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let Some(index_info) = self.index_info.clone() else {
            return Ok(None);
        };
        let Some(inner_table) = self.inner_table.clone() else {
            return Ok(None);
        };

        loop {
            let Some((outer_tuple, _)) = self.child.next()? else {
                return Ok(None);
            };

            let probe = match self.key_expression.evaluate(&outer_tuple, &self.outer_schema) {
                DataValue::Integer(key) => index_info.index.get(&key)?,
                _ => None,
            };

            let inner_tuple = match probe {
                Some(rid) => inner_table.heap.get_tuple(rid)?,
                None => None,
            };

            if let Some(inner_tuple) = inner_tuple {
                let mut values = outer_tuple.into_values();
                values.extend(inner_tuple.values().iter().cloned());
                return Ok(Some((Tuple::new(values), Rid::INVALID)));
            }

            if self.join_type == JoinType::Left {
                let mut values = outer_tuple.into_values();
                values.extend(std::iter::repeat(DataValue::Null).take(self.inner_schema.len()));
                return Ok(Some((Tuple::new(values), Rid::INVALID)));
            }
        }
    }
}
