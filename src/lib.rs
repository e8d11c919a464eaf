pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

mod util;

pub use client::{BingChatClient, SendOptions, SendResponse, TrackedInfo, Tracking};
pub use error::ClientError;
