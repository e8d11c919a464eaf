use crate::error::ClientError;
use crate::protocol::event::{BotMessage, CompletionEvent, StreamEvent, Throttling, UpdateEvent};
use crate::util::floor_char_boundary;

/// Marker the model emits when it starts writing the user's next turn.
pub const STOP_SEQUENCE: &str = "[user](#message)";

/// Text shown when moderation cut the reply before any text arrived.
pub const MODERATION_PLACEHOLDER: &str =
    "[Error: The moderation filter triggered. Try again with different wording.]";

/// Deltas may shrink by this many bytes without being treated as stale.
const SHRINK_SLACK: usize = 3;

/// Length of the prefix of `text` that can be shown as progress.
///
/// Trailing whitespace and a trailing partial stop sequence are held back
/// until a later update shows whether the stop sequence follows. The stop
/// sequence has a single `[`, so only the last one can open a partial match.
fn releasable_len(text: &str) -> usize {
    let trimmed = text.trim_end();
    match trimmed.rfind('[') {
        Some(pos) if STOP_SEQUENCE.starts_with(&trimmed[pos..]) => trimmed[..pos].trim_end().len(),
        _ => trimmed.len(),
    }
}

/// The resolved reply of one exchange.
#[derive(Debug, Clone)]
pub struct AssembledReply {
    pub text: String,
    pub message: BotMessage,
    /// Text the hub itself put in the terminal message, before any patching.
    pub title: String,
    pub conversation_expiry_time: Option<String>,
    pub throttling: Option<Throttling>,
}

/// Result of feeding one event.
#[derive(Debug)]
pub enum Step {
    Continue,
    Done(Result<AssembledReply, ClientError>),
}

/// Per-exchange reply state.
///
/// Feeds incremental updates into `reply_so_far` and reconciles them with
/// the terminal event. Resolves exactly once; events fed after resolution
/// are ignored.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    reply_so_far: String,
    /// Bytes of `reply_so_far` already handed to the progress callback.
    emitted_len: usize,
    stop_token_found: bool,
    has_card_only_request: bool,
    tracked: bool,
    resolved: bool,
}

impl ResponseAssembler {
    /// `tracked` enables moderation truncation, which only applies when the
    /// client keeps its own conversation history.
    #[must_use]
    pub fn new(tracked: bool) -> Self {
        Self {
            tracked,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reply_so_far(&self) -> &str {
        &self.reply_so_far
    }

    #[must_use]
    pub fn stop_token_found(&self) -> bool {
        self.stop_token_found
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn feed(&mut self, event: StreamEvent, on_progress: &mut dyn FnMut(&str)) -> Step {
        if self.resolved {
            return Step::Continue;
        }
        match event {
            StreamEvent::Update(update) => {
                self.apply_update(&update, on_progress);
                Step::Continue
            }
            StreamEvent::Completion(completion) => {
                self.resolved = true;
                self.release_withheld(on_progress);
                Step::Done(self.resolve(*completion))
            }
            StreamEvent::Ignored => Step::Continue,
        }
    }

    fn apply_update(&mut self, update: &UpdateEvent, on_progress: &mut dyn FnMut(&str)) {
        if self.stop_token_found {
            return;
        }
        let Some(message) = update.first_message() else {
            return;
        };
        if !message.is_bot() {
            return;
        }
        if message.is_card_request() {
            self.has_card_only_request = true;
            return;
        }

        let updated = message.text();
        if updated.is_empty()
            || updated.len() + SHRINK_SLACK < self.reply_so_far.len()
            || updated == self.reply_so_far
        {
            return;
        }

        let (next, stopped) = match updated.trim().strip_suffix(STOP_SEQUENCE) {
            Some(before_stop) => (before_stop.trim().to_string(), true),
            None => (updated.to_string(), false),
        };

        let releasable = if stopped {
            next.len()
        } else {
            releasable_len(&next)
        };
        self.emit_up_to(&next, releasable, on_progress);

        if stopped {
            tracing::debug!("stop sequence reached, ignoring further updates");
            self.stop_token_found = true;
        }
        self.reply_so_far = next;
    }

    /// A reply that ended without a stop sequence owns its withheld tail.
    fn release_withheld(&mut self, on_progress: &mut dyn FnMut(&str)) {
        if self.stop_token_found || self.emitted_len >= self.reply_so_far.len() {
            return;
        }
        let text = std::mem::take(&mut self.reply_so_far);
        self.emit_up_to(&text, text.len(), on_progress);
        self.reply_so_far = text;
    }

    fn emit_up_to(&mut self, text: &str, end: usize, on_progress: &mut dyn FnMut(&str)) {
        let start = floor_char_boundary(&text[..end], self.emitted_len);
        let difference = &text[start..end];
        if !difference.is_empty() {
            on_progress(difference);
        }
        self.emitted_len = end;
    }
    fn resolve(&mut self, completion: CompletionEvent) -> Result<AssembledReply, ClientError> {
        let item = completion.item;
        let result = item.result.unwrap_or_default();

        if result.is_invalid_session() {
            return Err(ClientError::SessionInvalid(
                result.message.unwrap_or_default(),
            ));
        }

        let moderated = item.messages.first().is_some_and(BotMessage::is_moderated);
        let mut messages = item.messages;
        let terminal = messages.pop();
        let title = terminal
            .as_ref()
            .map(|message| message.text().to_string())
            .unwrap_or_default();
        let finish = |message: BotMessage| AssembledReply {
            text: message.text().to_string(),
            message,
            title: title.clone(),
            conversation_expiry_time: item.conversation_expiry_time.clone(),
            throttling: item.throttling.clone(),
        };

        if result.has_error() {
            tracing::debug!(
                value = result.value.as_deref().unwrap_or(""),
                message = result.message.as_deref().unwrap_or(""),
                error = ?result.error,
                exception = ?result.exception,
                "terminal event reported an error"
            );
            if self.reply_so_far.is_empty() {
                return Err(ClientError::GenerationError {
                    code: result.value.unwrap_or_default(),
                    message: result.message.unwrap_or_default(),
                });
            }
            let mut message = terminal.unwrap_or_else(|| BotMessage {
                author: crate::protocol::event::BOT_AUTHOR.to_string(),
                ..BotMessage::default()
            });
            message.set_display_text(&self.reply_so_far);
            return Ok(finish(message));
        }

        let Some(mut message) = terminal else {
            return Err(ClientError::EmptyResponse);
        };
        if !message.is_bot() {
            return Err(ClientError::UnexpectedAuthor(message.author));
        }

        if self.tracked && (self.stop_token_found || moderated) {
            if self.reply_so_far.is_empty() {
                self.reply_so_far = MODERATION_PLACEHOLDER.to_string();
            }
            message.set_display_text(&self.reply_so_far);
            message.suggested_responses = None;
        }

        if self.has_card_only_request {
            message.set_display_text(&self.reply_so_far);
        }

        Ok(finish(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn update(text: &str) -> StreamEvent {
        StreamEvent::from_value(json!({
            "type": 1,
            "arguments": [{"messages": [{"author": "bot", "text": text}]}]
        }))
    }

    fn completion(item: Value) -> StreamEvent {
        StreamEvent::from_value(json!({"type": 2, "item": item}))
    }

    fn bot_terminal(text: &str) -> Value {
        json!({
            "author": "bot",
            "text": text,
            "adaptiveCards": [{"body": [{"type": "TextBlock", "text": text}]}],
            "suggestedResponses": [{"text": "Tell me more"}]
        })
    }

    fn run(
        assembler: &mut ResponseAssembler,
        events: Vec<StreamEvent>,
    ) -> (Vec<String>, Option<Result<AssembledReply, ClientError>>) {
        let mut progress = Vec::new();
        let mut outcome = None;
        for event in events {
            let step = assembler.feed(event, &mut |delta: &str| progress.push(delta.to_string()));
            if let Step::Done(result) = step {
                outcome = Some(result);
            }
        }
        (progress, outcome)
    }

    #[test]
    fn test_deltas_concatenate_to_final_text() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, outcome) = run(
            &mut assembler,
            vec![
                update("Hel"),
                update("Hello"),
                update("Hello"),
                update("Hello, wor"),
                update("Hello, world!"),
                completion(json!({"messages": [bot_terminal("Hello, world!")]})),
            ],
        );
        assert_eq!(progress.concat(), "Hello, world!");
        assert_eq!(progress, vec!["Hel", "lo", ", wor", "ld!"]);
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Hello, world!");
        assert!(reply.message.suggested_responses.is_some());
    }

    #[test]
    fn test_stale_and_non_bot_updates_are_ignored() {
        let mut assembler = ResponseAssembler::new(false);
        let user_update = StreamEvent::from_value(json!({
            "type": 1,
            "arguments": [{"messages": [{"author": "user", "text": "ignored"}]}]
        }));
        let empty_update = StreamEvent::from_value(json!({"type": 1, "arguments": [{"messages": []}]}));
        let (progress, _) = run(
            &mut assembler,
            vec![
                user_update,
                empty_update,
                update("The quick brown fox"),
                update("The quick"),
                update(""),
            ],
        );
        assert_eq!(progress, vec!["The quick brown fox"]);
        assert_eq!(assembler.reply_so_far(), "The quick brown fox");
    }

    #[test]
    fn test_small_shrink_within_slack_is_accepted() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, _) = run(&mut assembler, vec![update("abcdef"), update("abcd")]);
        assert_eq!(progress, vec!["abcdef"]);
        assert_eq!(assembler.reply_so_far(), "abcd");
    }

    #[test]
    fn test_stop_sequence_halts_progress_and_is_stripped() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, outcome) = run(
            &mut assembler,
            vec![
                update("Sure thing."),
                update("Sure thing. Anything else?\n\n[user](#message)"),
                update("Sure thing. Anything else?\n\n[user](#message)\nWhat about"),
                completion(json!({"messages": [bot_terminal("Sure thing. Anything else? [user](#message) What about")]})),
            ],
        );
        assert!(assembler.stop_token_found());
        assert_eq!(progress.concat(), "Sure thing. Anything else?");
        assert!(!progress.concat().contains(STOP_SEQUENCE));
        assert_eq!(assembler.reply_so_far(), "Sure thing. Anything else?");
        // untracked: terminal message is returned as delivered
        let reply = outcome.unwrap().unwrap();
        assert!(reply.text.contains("What about"));
    }

    #[test]
    fn test_stop_sequence_in_tracked_mode_truncates_terminal_text() {
        let mut assembler = ResponseAssembler::new(true);
        let (_, outcome) = run(
            &mut assembler,
            vec![
                update("Answer.\n[user](#message)"),
                completion(json!({"messages": [bot_terminal("Answer. [user](#message) question")]})),
            ],
        );
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Answer.");
        assert!(!reply.text.contains(STOP_SEQUENCE));
        assert_eq!(reply.title, "Answer. [user](#message) question");
        assert!(reply.message.suggested_responses.is_none());
    }

    #[test]
    fn test_invalid_session_fails() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, outcome) = run(
            &mut assembler,
            vec![
                update("partial"),
                completion(json!({
                    "messages": [bot_terminal("x")],
                    "result": {"value": "InvalidSession", "message": "Session expired"}
                })),
            ],
        );
        let err = outcome.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::SessionInvalid(ref message) if message == "Session expired"));
    }

    #[test]
    fn test_error_with_partial_text_is_salvaged() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, outcome) = run(
            &mut assembler,
            vec![
                update("Partial answer"),
                completion(json!({
                    "messages": [bot_terminal("Something went wrong")],
                    "result": {"value": "Throttled", "message": "slow down", "error": "Throttled"},
                    "conversationExpiryTime": "2024-05-01T00:00:00Z"
                })),
            ],
        );
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Partial answer");
        assert_eq!(
            reply.message.adaptive_cards[0].body[0].text.as_deref(),
            Some("Partial answer")
        );
        assert_eq!(
            reply.conversation_expiry_time.as_deref(),
            Some("2024-05-01T00:00:00Z")
        );
    }

    #[test]
    fn test_error_without_text_fails_with_service_message() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, outcome) = run(
            &mut assembler,
            vec![completion(json!({
                "messages": [],
                "result": {"value": "Throttled", "message": "Request is throttled.", "error": "Throttled"}
            }))],
        );
        let err = outcome.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Throttled: Request is throttled.");
    }

    #[test]
    fn test_missing_terminal_message_fails() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, outcome) = run(&mut assembler, vec![completion(json!({"result": {"value": "Success"}}))]);
        assert!(matches!(outcome.unwrap(), Err(ClientError::EmptyResponse)));
    }

    #[test]
    fn test_unexpected_author_fails() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, outcome) = run(
            &mut assembler,
            vec![completion(json!({"messages": [{"author": "user", "text": "echo"}]}))],
        );
        assert!(matches!(
            outcome.unwrap(),
            Err(ClientError::UnexpectedAuthor(ref author)) if author == "user"
        ));
    }

    #[test]
    fn test_topic_change_in_tracked_mode_keeps_partial_text() {
        let mut assembler = ResponseAssembler::new(true);
        let mut terminal = bot_terminal("I'd rather not talk about that.");
        terminal["topicChangerText"] = json!("New topic");
        let (_, outcome) = run(
            &mut assembler,
            vec![update("Hello"), update("Hello wor"), completion(json!({"messages": [terminal]}))],
        );
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Hello wor");
        assert_eq!(reply.message.text(), "Hello wor");
        assert!(reply.message.suggested_responses.is_none());
    }

    #[test]
    fn test_offense_without_text_uses_placeholder() {
        let mut assembler = ResponseAssembler::new(true);
        let mut terminal = bot_terminal("Hmm…");
        terminal["offense"] = json!("OffenseTrigger");
        let (_, outcome) = run(&mut assembler, vec![completion(json!({"messages": [terminal]}))]);
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, MODERATION_PLACEHOLDER);
    }

    #[test]
    fn test_moderation_flags_ignored_when_untracked() {
        let mut assembler = ResponseAssembler::new(false);
        let mut terminal = bot_terminal("Let's change the subject.");
        terminal["topicChangerText"] = json!("New topic");
        let (_, outcome) = run(
            &mut assembler,
            vec![update("Hello wor"), completion(json!({"messages": [terminal]}))],
        );
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Let's change the subject.");
        assert!(reply.message.suggested_responses.is_some());
    }

    #[test]
    fn test_moderation_flag_read_from_first_message() {
        let mut assembler = ResponseAssembler::new(true);
        let (_, outcome) = run(
            &mut assembler,
            vec![
                update("Partial"),
                completion(json!({"messages": [
                    {"author": "bot", "text": "x", "offense": "OffenseTrigger"},
                    bot_terminal("final")
                ]})),
            ],
        );
        assert_eq!(outcome.unwrap().unwrap().text, "Partial");
    }

    #[test]
    fn test_card_only_turn_uses_accumulated_text() {
        let mut assembler = ResponseAssembler::new(false);
        let card = StreamEvent::from_value(json!({
            "type": 1,
            "arguments": [{"messages": [{"author": "bot", "text": "", "messageType": "RenderCardRequest"}]}]
        }));
        let (progress, outcome) = run(
            &mut assembler,
            vec![
                update("Here is the weather"),
                card,
                completion(json!({"messages": [bot_terminal("N/A")]})),
            ],
        );
        assert_eq!(progress.concat(), "Here is the weather");
        let reply = outcome.unwrap().unwrap();
        assert_eq!(reply.text, "Here is the weather");
        assert_eq!(
            reply.message.adaptive_cards[0].body[0].text.as_deref(),
            Some("Here is the weather")
        );
        assert_eq!(reply.title, "N/A");
    }

    #[test]
    fn test_resolves_exactly_once() {
        let mut assembler = ResponseAssembler::new(false);
        let (_, first) = run(
            &mut assembler,
            vec![update("one"), completion(json!({"messages": [bot_terminal("one")]}))],
        );
        assert!(first.unwrap().is_ok());
        assert!(assembler.is_resolved());
        let (progress, second) = run(
            &mut assembler,
            vec![update("one two"), completion(json!({"messages": [bot_terminal("two")]}))],
        );
        assert!(progress.is_empty());
        assert!(second.is_none());
    }

    #[test]
    fn test_multibyte_rewrite_does_not_panic() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, _) = run(&mut assembler, vec![update("ab"), update("éé")]);
        assert_eq!(progress, vec!["ab", "é"]);
        assert_eq!(assembler.reply_so_far(), "éé");
    }

    #[test]
    fn test_stop_sequence_split_across_updates_is_never_shown() {
        let mut assembler = ResponseAssembler::new(true);
        let (progress, outcome) = run(
            &mut assembler,
            vec![
                update("Answer."),
                update("Answer.\n\n[user"),
                update("Answer.\n\n[user](#message)"),
                completion(json!({"messages": [bot_terminal("Answer. [user](#message)")]})),
            ],
        );
        assert_eq!(progress.concat(), "Answer.");
        assert_eq!(assembler.reply_so_far(), "Answer.");
        assert_eq!(outcome.unwrap().unwrap().text, "Answer.");
    }

    #[test]
    fn test_bare_partial_stop_sequence_is_held_back() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, _) = run(&mut assembler, vec![update("[user"), update("[user](#message)")]);
        assert!(progress.is_empty());
        assert!(assembler.stop_token_found());
        assert_eq!(assembler.reply_so_far(), "");
    }

    #[test]
    fn test_held_back_text_is_released_when_no_stop_follows() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, _) = run(
            &mut assembler,
            vec![update("Look at [u"), update("Look at [url] "), update("Look at [url] now")],
        );
        assert_eq!(progress, vec!["Look at", " [url]", " now"]);
        assert_eq!(progress.concat(), assembler.reply_so_far());
    }

    #[test]
    fn test_withheld_tail_is_flushed_on_completion() {
        let mut assembler = ResponseAssembler::new(false);
        let (progress, outcome) = run(
            &mut assembler,
            vec![
                update("Done [us"),
                completion(json!({"messages": [bot_terminal("Done [us")]})),
            ],
        );
        assert_eq!(progress, vec!["Done", " [us"]);
        assert_eq!(progress.concat(), assembler.reply_so_far());
        assert!(outcome.unwrap().is_ok());
    }
}
