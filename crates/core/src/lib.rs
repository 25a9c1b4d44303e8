pub mod collaborators;
pub mod config;
pub mod error;
pub mod sends;
pub mod types;

pub use config::AppConfig;
pub use error::{OutreachError, OutreachResult};
pub use sends::{SendKey, SendStore};
