//! Observability for the node: structured logging setup.

mod logging;

pub use logging::{init_logging, LogFormat};
