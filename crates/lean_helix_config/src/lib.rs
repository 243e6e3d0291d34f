pub mod config;
pub mod dumping;
