#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod gateway;
pub mod http;
pub mod state;
pub mod store;
pub mod util;
