//! Observability for the filter: structured logging setup and span macros

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, ENGINE_LOG_TARGET};

// Span macros for structured logging
pub use logging::{record_span, session_span};
