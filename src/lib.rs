// Library interface for testing

pub mod api;
pub mod config;
pub mod dj;
pub mod encoder;
pub mod library;
pub mod schedule;
pub mod select;
pub mod store;
