pub mod config;
pub mod pipeline;
pub mod supervisor;
pub mod transport;

pub use config::Settings;
