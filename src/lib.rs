pub mod config;
pub mod errors;
pub mod streaming;
pub mod upstream;
pub mod web;
