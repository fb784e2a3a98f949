pub mod audio;
pub mod carrier;
pub mod control;
pub mod model;
pub mod outbound;
pub mod session;
pub mod token;
pub mod transcript;
pub mod twiml;

pub use audio::{FrameBuffer, FrameSink, FRAME_BYTES, FRAME_INTERVAL};
pub use control::ControlPlane;
pub use outbound::{CallDispatcher, CallRegistry};
pub use token::{EphemeralCredential, MintError, MintRequest, TokenMinter};
pub use transcript::{TranscriptEntry, TranscriptKind, TranscriptStore};
