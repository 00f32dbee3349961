pub mod backend;
pub mod bus;
pub mod channel;
pub mod console;
pub mod core;
pub mod debounce;
pub mod error;
pub mod http;
pub mod navigation;
pub mod reconciler;
pub mod volume;
