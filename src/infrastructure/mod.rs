pub mod event_bus;
pub mod log_redact;
pub mod logging;
pub mod page_context;
