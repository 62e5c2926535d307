//! Messaging-channel gateways: the sender interface the dispatcher drives,
//! webhook parsing into the normalized inbound shape, and webhook
//! authenticity checks.

pub mod sender;
pub mod telegram;
pub mod verify;
pub mod whatsapp;

pub use sender::{fit_to_limit, response_limit, ChannelError, ChannelSender, RecordingSender};
pub use verify::{verify_hmac_signature, verify_secret_token};
