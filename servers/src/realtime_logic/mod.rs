pub mod config;
pub mod downstream;
pub mod logger;
pub mod model;
