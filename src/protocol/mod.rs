//! Typed records exchanged with the service: the session-creation body, the
//! outgoing invocation and the incoming hub events.

pub mod event;
pub mod request;
pub mod session;

pub use event::{BotMessage, CompletionEvent, StreamEvent, Throttling, UpdateEvent};
pub use request::{
    build_invocation, ChatTone, ComposeFormat, ComposeLength, ComposeTone, ExchangeMode,
    InvocationInput, InvocationRequest,
};
pub use session::{session_from_body, Session};
