//! Derived series: per-row pipeline, shared storage, and the read-side
//! transforms applied by curve consumers.
pub mod moving_average;
pub mod pipeline;
pub mod projection;
pub mod series;
pub mod storage;
pub mod summary;
