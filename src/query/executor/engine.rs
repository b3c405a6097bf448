use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Drives a pull pipeline to completion and collects its output
pub struct ExecutionEngine;

impl ExecutionEngine {
    pub fn execute(executor: &mut dyn Executor) -> Result<Vec<Tuple>, ExecutionError> {
        executor.init()?;
        let mut tuples = Vec::new();
        while let Some((tuple, _rid)) = executor.next()? {
            tuples.push(tuple);
        }
        Ok(tuples)
    }
}
