//! # Task Dispatch
//!
//! The submit/await contract between steps and the remote worker pool.
//!
//! Steps build one [`TaskDescriptor`] per remote unit of work and hand it to a
//! [`TaskDispatchFacade`]. Async submissions return the wait id immediately;
//! the worker's eventual [`ResponseData`] is routed back through the
//! correlation registry. `submit_blocking` is the separate, timeout-bounded
//! primitive used for small inline lookups such as Helm release history.

pub mod facade;
pub mod in_memory;
pub mod types;

pub use facade::TaskDispatchFacade;
pub use in_memory::InMemoryDispatcher;
pub use types::{ElementNotify, ErrorResponse, ResponseData, TaskDescriptor, TaskResult, TaskType};
