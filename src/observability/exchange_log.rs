use std::time::Duration;

use tracing::info;

use crate::protocol::event::Throttling;

/// User turns left before the hub stops accepting messages in this
/// conversation, when the terminal event reported both counters.
#[must_use]
pub fn remaining_turns(throttling: &Throttling) -> Option<u32> {
    let max = throttling.max_num_user_messages_in_conversation?;
    let used = throttling.num_user_messages_in_conversation?;
    Some(max.saturating_sub(used))
}

/// Log a completed exchange at INFO level.
pub fn log_exchange(mode: &str, throttling: Option<&Throttling>, duration: Duration) {
    let used = throttling.and_then(|t| t.num_user_messages_in_conversation);
    let max = throttling.and_then(|t| t.max_num_user_messages_in_conversation);
    info!(
        mode = mode,
        user_messages = used.unwrap_or(0),
        max_user_messages = max.unwrap_or(0),
        remaining_turns = throttling.and_then(remaining_turns).unwrap_or(0),
        duration_seconds = duration.as_secs_f64(),
        "exchange completed"
    );
}
