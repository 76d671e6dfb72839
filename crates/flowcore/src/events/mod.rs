mod base;

pub use base::{EventEmitter, ExecutionEvent, NodeEvent};
