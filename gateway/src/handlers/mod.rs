//! HTTP and WebSocket handlers.

pub mod api;
pub mod calls;
pub mod control;
pub mod live;
pub mod stream;
pub mod token;
pub mod twiml;

pub use stream::{stream_upgrade, stream_upgrade_with_token};
pub use twiml::{document_action, document_get, document_post};
