use std::collections::HashMap;

use crate::catalog::{DataValue, Expression, Schema};
use crate::common::types::Rid;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

/// Running state of one aggregate within one group
#[derive(Debug, Clone)]
struct Accumulator {
    agg: AggregateType,
    count: i64,
    value: DataValue,
}

impl Accumulator {
    fn new(agg: AggregateType) -> Self {
        Self {
            agg,
            count: 0,
            value: DataValue::Null,
        }
    }

    fn update(&mut self, input: Option<&DataValue>) {
        match self.agg {
            AggregateType::CountStar => self.count += 1,
            AggregateType::Count => {
                if input.is_some_and(|v| !v.is_null()) {
                    self.count += 1;
                }
            }
            AggregateType::Sum => {
                let Some(input) = input.filter(|v| !v.is_null()) else {
                    return;
                };
                self.value = match (&self.value, input) {
                    (DataValue::Null, v) => v.clone(),
                    (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a + b),
                    (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
                    (DataValue::Integer(a), DataValue::Float(b)) => {
                        DataValue::Float(*a as f64 + b)
                    }
                    (DataValue::Float(a), DataValue::Integer(b)) => {
                        DataValue::Float(a + *b as f64)
                    }
                    (current, _) => current.clone(),
                };
            }
            AggregateType::Min => {
                let Some(input) = input.filter(|v| !v.is_null()) else {
                    return;
                };
                if self.value.is_null() || input.compare(&self.value).is_lt() {
                    self.value = input.clone();
                }
            }
            AggregateType::Max => {
                let Some(input) = input.filter(|v| !v.is_null()) else {
                    return;
                };
                if self.value.is_null() || input.compare(&self.value).is_gt() {
                    self.value = input.clone();
                }
            }
        }
    }

    fn finalize(&self) -> DataValue {
        match self.agg {
            AggregateType::CountStar | AggregateType::Count => DataValue::Integer(self.count),
            AggregateType::Sum | AggregateType::Min | AggregateType::Max => self.value.clone(),
        }
    }
}

/// Hash aggregation: materializes the child into a hash table keyed by the
/// group-by tuple and keeps one accumulator per aggregate per group. Output
/// rows are the group-by values followed by the aggregate results.
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    schema: Schema,
    group_by: Vec<Expression>,
    aggregates: Vec<(AggregateType, Option<Expression>)>,
    output: Option<std::vec::IntoIter<(Tuple, Rid)>>,
}

impl AggregationExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        schema: Schema,
        group_by: Vec<Expression>,
        aggregates: Vec<(AggregateType, Option<Expression>)>,
    ) -> Self {
        Self {
            child,
            schema,
            group_by,
            aggregates,
            output: None,
        }
    }

    fn fresh_accumulators(&self) -> Vec<Accumulator> {
        self.aggregates
            .iter()
            .map(|(agg, _)| Accumulator::new(*agg))
            .collect()
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.output = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.output.is_none() {
            let mut groups: HashMap<Vec<DataValue>, Vec<Accumulator>> = HashMap::new();

            while let Some((tuple, _)) = self.child.next()? {
                let key: Vec<DataValue> = self
                    .group_by
                    .iter()
                    .map(|expr| expr.evaluate(&tuple, &self.schema))
                    .collect();

                let accumulators = groups
                    .entry(key)
                    .or_insert_with(|| self.fresh_accumulators());
                for (accumulator, (_, argument)) in
                    accumulators.iter_mut().zip(self.aggregates.iter())
                {
                    let input = argument
                        .as_ref()
                        .map(|expr| expr.evaluate(&tuple, &self.schema));
                    accumulator.update(input.as_ref());
                }
            }

            if groups.is_empty() && self.group_by.is_empty() {
                // Empty input over no groups: count(*) is 0, everything
                // else is NULL.
                let values: Vec<DataValue> = self
                    .aggregates
                    .iter()
                    .map(|(agg, _)| match agg {
                        AggregateType::CountStar => DataValue::Integer(0),
                        _ => DataValue::Null,
                    })
                    .collect();
                self.output = Some(vec![(Tuple::new(values), Rid::INVALID)].into_iter());
            } else {
                let rows: Vec<(Tuple, Rid)> = groups
                    .into_iter()
                    .map(|(key, accumulators)| {
                        let mut values = key;
                        values.extend(accumulators.iter().map(|a| a.finalize()));
                        (Tuple::new(values), Rid::INVALID)
                    })
                    .collect();
                self.output = Some(rows.into_iter());
            }
        }

        Ok(self.output.as_mut().and_then(|iter| iter.next()))
    }
}
