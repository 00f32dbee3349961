//! Wire types, framing and configuration shared by the amp remote.

pub mod config;
pub mod event;
pub mod frame;
pub mod platform;
pub mod protocol;
pub mod state;
