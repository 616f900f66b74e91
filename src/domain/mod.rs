//! Domain layer: message model, error taxonomy, settings, and the
//! periodic pushes (navigation playback, time sync, notifications).

pub mod errors;
pub mod models;
pub mod navigation;
pub mod notifications;
pub mod ports;
pub mod route;
pub mod settings;
pub mod time_sync;

#[cfg(test)]
pub(crate) mod testing;
