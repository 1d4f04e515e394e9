//! ### English
//! Small synchronization helpers shared across the engine.
//!
//! ### 中文
//! 引擎内复用的小型同步工具。
mod backoff;

pub(crate) use backoff::Backoff;
