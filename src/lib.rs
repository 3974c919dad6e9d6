#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod backend;
pub mod config;
pub mod data;
pub mod feed;
pub mod gesture;
pub mod logging;
pub mod playback;
pub mod player;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod ui;
pub mod update;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
