pub mod api;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
