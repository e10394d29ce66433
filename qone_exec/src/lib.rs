//! Vectorized, morsel-parallel execution of TPC-H Q1 over a column-major
//! lineitem table.
//!
//! [`Kernel`] evaluates the query over a row range in fixed-size batches
//! into a private shard. [`MorselScheduler`] runs one kernel per worker
//! thread, hands out morsels from a shared cursor and folds the shards into
//! one [`GlobalTable`]. [`naive_q1`] is the row-at-a-time reference every
//! kernel variant must match exactly.
#![deny(missing_docs)]

pub mod aggr;
pub mod decimal;
mod error;
pub mod kernel;
pub mod morsel;
pub mod primitives;
pub mod profile;
pub mod pushdown;
pub mod reference;
pub mod result;
pub mod strategy;

pub use aggr::{AggrRow, AggrTable, GlobalTable, Layout};
pub use error::{ExecError, Result};
pub use kernel::{AggrFlavour, Kernel, KernelConfig, KernelStats, SimdFlavour};
pub use morsel::{MorselScheduler, SchedulerConfig};
pub use primitives::GroupDomain;
pub use profile::KernelProfile;
pub use pushdown::{FilterChunk, PushdownFilter};
pub use reference::naive_q1;
pub use result::{QueryResult, ResultRow};
