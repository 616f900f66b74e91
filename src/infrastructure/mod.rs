pub mod bluetooth;
pub mod logging;
pub mod notification_source;
