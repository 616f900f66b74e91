//! Phone-side controller for BLE AR glasses: keeps one link to the glasses
//! and pushes time, notifications and navigation cues over it.

pub mod controller;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
