#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod genai;
pub mod identity;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod pdf;
pub mod store;
pub mod studio;
