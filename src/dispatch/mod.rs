//! # 监听分发模块

pub mod engine;
pub mod pool;
pub mod sorted;

pub use engine::{DispatchOutcome, ListenerDispatcher, Resume};
pub use pool::AsyncWorkerPool;
pub use sorted::{ListenerEntry, ListenerId, ListenerSnapshot, SortedListeners};
