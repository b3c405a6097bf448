use serde::{Deserialize, Serialize};

use crate::catalog::value::DataValue;

/// A tuple: one row's values, stored bincode-encoded in a heap page record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<DataValue>,
}

impl Tuple {
    pub fn new(values: Vec<DataValue>) -> Self {
        Self { values }
    }

    pub fn value(&self, index: usize) -> &DataValue {
        &self.values[index]
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<DataValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.values)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        Ok(Self {
            values: bincode::deserialize(bytes)?,
        })
    }
}
