use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message type the hub uses for a non-text card placeholder.
pub const RENDER_CARD_REQUEST: &str = "RenderCardRequest";
/// `result.value` reported when the remote session expired.
pub const INVALID_SESSION: &str = "InvalidSession";
/// `offense` value set when the moderation filter fired.
pub const OFFENSE_TRIGGER: &str = "OffenseTrigger";
pub const BOT_AUTHOR: &str = "bot";

/// A message authored by the bot (or, unexpectedly, by someone else).
///
/// Only the fields the client inspects or patches are typed; everything
/// else the hub sends is kept in `extra` and handed back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotMessage {
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adaptive_cards: Vec<AdaptiveCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_responses: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_changer_text: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offense: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveCard {
    #[serde(default)]
    pub body: Vec<CardBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BotMessage {
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.author == BOT_AUTHOR
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn is_card_request(&self) -> bool {
        self.message_type.as_deref() == Some(RENDER_CARD_REQUEST)
    }

    /// Whether the hub flagged this message as moderated.
    #[must_use]
    pub fn is_moderated(&self) -> bool {
        self.topic_changer_text.as_ref().is_some_and(is_truthy)
            || self.offense.as_deref() == Some(OFFENSE_TRIGGER)
    }

    /// Replace the displayed text: the plain `text` field and the first block
    /// of the first rendered card.
    pub fn set_display_text(&mut self, text: &str) {
        self.text = Some(text.to_string());
        if let Some(block) = self
            .adaptive_cards
            .first_mut()
            .and_then(|card| card.body.first_mut())
        {
            block.text = Some(text.to_string());
        }
    }
}

/// Rate-limit counters attached to the terminal event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Throttling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_user_messages_in_conversation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_user_messages_in_conversation: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionResult {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub exception: Option<Value>,
}

impl CompletionResult {
    #[must_use]
    pub fn is_invalid_session(&self) -> bool {
        self.value.as_deref() == Some(INVALID_SESSION)
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(is_truthy)
    }
}

/// Payload of a type-1 frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEvent {
    #[serde(default)]
    pub arguments: Vec<UpdateArguments>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateArguments {
    #[serde(default)]
    pub messages: Vec<BotMessage>,
}

impl UpdateEvent {
    /// First message of the first argument, the only one the hub fills.
    #[must_use]
    pub fn first_message(&self) -> Option<&BotMessage> {
        self.arguments.first()?.messages.first()
    }
}

/// Payload of a type-2 frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionEvent {
    #[serde(default)]
    pub item: CompletionItem,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    #[serde(default)]
    pub messages: Vec<BotMessage>,
    #[serde(default)]
    pub throttling: Option<Throttling>,
    #[serde(default)]
    pub result: Option<CompletionResult>,
    #[serde(default)]
    pub conversation_expiry_time: Option<String>,
}

/// A decoded hub frame.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Update(UpdateEvent),
    Completion(Box<CompletionEvent>),
    Ignored,
}

const EVENT_TYPE_UPDATE: u64 = 1;
const EVENT_TYPE_COMPLETION: u64 = 2;

impl StreamEvent {
    /// Decode a JSON record by its numeric `type` tag.
    ///
    /// Unknown tags and payloads that do not match the expected shape decode
    /// to [`StreamEvent::Ignored`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let tag = value.get("type").and_then(Value::as_u64);
        match tag {
            Some(EVENT_TYPE_UPDATE) => serde_json::from_value(value)
                .map_or(StreamEvent::Ignored, StreamEvent::Update),
            Some(EVENT_TYPE_COMPLETION) => serde_json::from_value(value)
                .map_or(StreamEvent::Ignored, |event| {
                    StreamEvent::Completion(Box::new(event))
                }),
            _ => StreamEvent::Ignored,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
