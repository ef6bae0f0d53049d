// Database layer: connection pool, scoped checkout with leak detection, provisioning

pub mod pool;
pub mod provision;
pub mod scoped;
pub mod statement;

pub use pool::{DbPool, FatalSignal};
pub use scoped::{
    LastQuery, LeakDetection, LeakReport, LeakReporter, LogLeakReporter, ScopedConnection,
};
pub use statement::{RowSet, SqlParam};
