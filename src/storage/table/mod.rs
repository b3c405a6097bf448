pub mod heap;
pub mod tuple;

pub use heap::{TableHeap, TableHeapError, TableIterator};
pub use tuple::Tuple;
