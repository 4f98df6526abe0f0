//! Custom resources owned by other projects.

pub mod kruise;
pub mod monitoring;
