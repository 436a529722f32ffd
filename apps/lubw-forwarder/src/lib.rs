pub mod cli;
pub mod config;
pub mod lubw;
pub mod mqtt;
pub mod pipeline;
pub mod record;
pub mod stations;
pub mod window;
