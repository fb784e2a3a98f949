pub mod client;
pub mod messages;

pub use client::{connect_model, ModelAuth, ModelConnectOptions, ModelError, ModelStream};
pub use messages::{ClientEvent, ServerEvent};
