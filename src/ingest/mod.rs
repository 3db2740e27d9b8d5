//! Reading the instrument log: line codec and the live tail task.

pub mod decode;
pub mod tailer;

pub use decode::{Header, RawRow};
pub use tailer::{FollowMode, LineReader, Tailer, TailerState};
