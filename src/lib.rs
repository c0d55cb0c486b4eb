mod cache;
mod client;
mod diff;
mod error;
mod lock;
mod logger;
mod parser;
mod protocol;
mod session;
mod types;

pub use client::{SmartAcClient, SmartAcClientBuilder};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use parser::Payload;
pub use protocol::{LEGACY_BASE_URL, MODERN_BASE_URL};
pub use types::*;
