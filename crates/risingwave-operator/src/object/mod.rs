//! In-memory views of the custom objects being reconciled.

pub mod risingwave_manager;
pub mod scale_view_lock;

pub use self::{risingwave_manager::RisingWaveManager, scale_view_lock::ScaleViewLockManager};
