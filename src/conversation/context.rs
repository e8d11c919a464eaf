use rustc_hash::{FxHashMap, FxHashSet};

use super::{Message, Role};
use crate::config::ConversationConfig;

const SYSTEM_TAG: &str = "[system](#additional_instructions)";
const USER_TAG: &str = "[user](#message)";
const BOT_TAG: &str = "[Sydney](#message)";

/// Walk parent links from `start` back to the root and return the chain
/// root-first.
///
/// Stops at a missing parent, an id that is not in `messages`, or an id that
/// was already visited; a malformed store with a cycle therefore yields at
/// most `messages.len()` entries. When ids repeat, the first occurrence wins.
#[must_use]
pub fn build_ancestry_chain<'a>(messages: &'a [Message], start: Option<&str>) -> Vec<&'a Message> {
    let mut by_id: FxHashMap<&str, &Message> = FxHashMap::default();
    by_id.reserve(messages.len());
    for message in messages {
        by_id.entry(message.id.as_str()).or_insert(message);
    }

    let mut chain = Vec::new();
    let mut visited = FxHashSet::default();
    let mut current = start;
    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let Some(message) = by_id.get(id).copied() else {
            break;
        };
        chain.push(message);
        current = message.parent_message_id.as_deref();
    }
    chain.reverse();
    chain
}

/// Render role-tagged entries in the hub's transcript format.
#[must_use]
pub fn render_transcript<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (Role, &'a str)>,
{
    entries
        .into_iter()
        .map(|(role, text)| match role {
            Role::System => format!("N/A\n\n{SYSTEM_TAG}\n- {text}"),
            Role::User => format!("{USER_TAG}\n{text}"),
            Role::Bot => format!("{BOT_TAG}\n{text}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prior-context text for the first turn of a tracked conversation: the
/// system preamble, the opening bot line, then the ancestry of `parent`.
#[must_use]
pub fn render_previous_context(
    messages: &[Message],
    parent: Option<&str>,
    conversation: &ConversationConfig,
) -> String {
    let history = build_ancestry_chain(messages, parent);
    let preamble = [
        (Role::System, conversation.system_preamble.as_str()),
        (Role::Bot, conversation.opening_line.as_str()),
    ];
    render_transcript(
        preamble.into_iter().chain(history.into_iter().map(|message| {
            let role = if message.role == Role::User {
                Role::User
            } else {
                Role::Bot
            };
            (role, message.text.as_str())
        })),
    )
}
