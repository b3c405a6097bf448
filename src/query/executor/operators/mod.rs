pub mod aggregate;
pub mod delete;
pub mod index_scan;
pub mod insert;
pub mod join;
pub mod seq_scan;
pub mod sort;
pub mod topn;
pub mod values;

pub use aggregate::{AggregateType, AggregationExecutor};
pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use join::{JoinType, NestedIndexJoinExecutor, NestedLoopJoinExecutor};
pub use seq_scan::SeqScanExecutor;
pub use sort::{OrderByType, SortExecutor};
pub use topn::TopNExecutor;
pub use values::ValuesExecutor;
