pub mod app;
pub mod audio;
pub mod config;
pub mod core;
pub mod debounce;
pub mod history;
pub mod library;
pub mod model;
pub mod player;
pub mod tags;
