//! Inbound webhook handling: authenticity and payload model.

pub mod event;
pub mod signature;

pub use event::{EventKind, InboundEvent, ProjectRef, parse_event};
pub use signature::SignatureVerifier;

/// Headers that may carry the shared secret or an HMAC signature, in the
/// order they are consulted.
pub const SIGNATURE_HEADERS: &[&str] = &[
    "x-gitlab-token",
    "x-hub-signature-256",
    "x-webhook-signature",
];
