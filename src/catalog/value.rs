use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Possible data types for values in a tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Type discriminant first to avoid collisions between variants
        match self {
            DataValue::Null => {
                0u8.hash(state);
            }
            DataValue::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            DataValue::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            DataValue::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            DataValue::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "\"{}\"", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            // Null is incomparable with anything
            (DataValue::Null, _) | (_, DataValue::Null) => None,

            (DataValue::Integer(a), DataValue::Integer(b)) => a.partial_cmp(b),
            (DataValue::Float(a), DataValue::Float(b)) => a.partial_cmp(b),

            // Integer and float can be compared
            (DataValue::Integer(a), DataValue::Float(b)) => (*a as f64).partial_cmp(b),
            (DataValue::Float(a), DataValue::Integer(b)) => a.partial_cmp(&(*b as f64)),

            (DataValue::Text(a), DataValue::Text(b)) => a.partial_cmp(b),
            (DataValue::Boolean(a), DataValue::Boolean(b)) => a.partial_cmp(b),

            _ => None,
        }
    }
}

impl DataValue {
    /// Total comparison for sorting: NULL sorts before every other value,
    /// values of incomparable types compare by variant order.
    pub fn compare(&self, other: &Self) -> Ordering {
        match self.partial_cmp(other) {
            Some(ordering) => ordering,
            None => match (self, other) {
                (DataValue::Null, DataValue::Null) => Ordering::Equal,
                (DataValue::Null, _) => Ordering::Less,
                (_, DataValue::Null) => Ordering::Greater,
                _ => self.variant_rank().cmp(&other.variant_rank()),
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Truthiness of a predicate result: only `Boolean(true)` passes
    pub fn is_true(&self) -> bool {
        matches!(self, DataValue::Boolean(true))
    }

    fn variant_rank(&self) -> u8 {
        match self {
            DataValue::Null => 0,
            DataValue::Boolean(_) => 1,
            DataValue::Integer(_) => 2,
            DataValue::Float(_) => 3,
            DataValue::Text(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_numeric_comparison() {
        assert_eq!(
            DataValue::Integer(2).partial_cmp(&DataValue::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            DataValue::Float(3.0).partial_cmp(&DataValue::Integer(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            DataValue::Null.compare(&DataValue::Integer(-100)),
            Ordering::Less
        );
        assert_eq!(DataValue::Null.compare(&DataValue::Null), Ordering::Equal);
    }
}
