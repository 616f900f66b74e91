//! Bluetooth Module
//!
//! Provides the BLE link to the glasses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkManager                         │
//! │  (single owner of the connection - public API for the    │
//! │   rest of the application)                               │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐  ┌───────────┐  ┌──────────┐
//! │ Transport  │  │ Simulated │  │ Protocol │
//! │            │  │ / WinRT   │  │          │
//! │ - trait    │  │ - backends│  │ - UUIDs  │
//! │ - events   │  │           │  │ - codec  │
//! └────────────┘  └───────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Wire payload encoding and the firmware's identifiers
//! - [`transport`] - The backend seam and its event types
//! - [`link`] - Connection lifecycle state machine and serialized writes
//! - [`simulated`] - In-process glasses for hosts without a radio
//! - `winrt` - Windows backend (Windows only)

pub mod link;
pub mod protocol;
pub mod simulated;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use link::{LinkConfig, LinkManager};
