//! Face identification against a small enrolled set, with evidence capture
//! for unknown faces

pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::Config;
