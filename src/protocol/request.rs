use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::protocol::session::Session;
use crate::util::random_hex;

/// Tone of a `chat` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatTone {
    Creative,
    #[default]
    Precise,
    Balanced,
}

impl ChatTone {
    #[must_use]
    pub fn option_set(self) -> &'static str {
        match self {
            ChatTone::Creative => "h3imaginative",
            ChatTone::Precise => "h3precise",
            ChatTone::Balanced => "harmonyv3",
        }
    }
}

impl fmt::Display for ChatTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTone::Creative => write!(f, "creative"),
            ChatTone::Precise => write!(f, "precise"),
            ChatTone::Balanced => write!(f, "balanced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComposeTone {
    #[default]
    Professional,
    Casual,
    Enthusiastic,
    Informational,
    Funny,
}

impl fmt::Display for ComposeTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeTone::Professional => write!(f, "professional"),
            ComposeTone::Casual => write!(f, "casual"),
            ComposeTone::Enthusiastic => write!(f, "enthusiastic"),
            ComposeTone::Informational => write!(f, "informational"),
            ComposeTone::Funny => write!(f, "funny"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComposeFormat {
    #[default]
    Paragraph,
    Email,
    BlogPost,
    Ideas,
}

impl fmt::Display for ComposeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeFormat::Paragraph => write!(f, "paragraph"),
            ComposeFormat::Email => write!(f, "email"),
            ComposeFormat::BlogPost => write!(f, "blog post"),
            ComposeFormat::Ideas => write!(f, "ideas"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComposeLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl fmt::Display for ComposeLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeLength::Short => write!(f, "short"),
            ComposeLength::Medium => write!(f, "medium"),
            ComposeLength::Long => write!(f, "long"),
        }
    }
}

/// What kind of turn is requested, with the selectors each kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    Chat {
        tone: ChatTone,
    },
    Compose {
        tone: ComposeTone,
        format: ComposeFormat,
        length: ComposeLength,
    },
}

impl Default for ExchangeMode {
    fn default() -> Self {
        ExchangeMode::Chat {
            tone: ChatTone::default(),
        }
    }
}

impl ExchangeMode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeMode::Chat { .. } => "chat",
            ExchangeMode::Compose { .. } => "compose",
        }
    }
}

const BASE_OPTION_SETS: &[&str] = &[
    "nlu_direct_response_filter",
    "deepleo",
    "enable_debug_commands",
    "disable_emoji_spoken_text",
    "responsible_ai_policy_235",
    "enablemm",
];

const CHAT_EXTRA_OPTION_SETS: &[&str] = &["dtappid", "cricinfo", "cricinfov2", "dv3sugg"];

const COMPOSE_OPTION_SETS: &[&str] = &["h3imaginative", "nocache", "nosugg"];

const CHAT_SLICE_IDS: &[&str] = &[
    "0310wlthrot",
    "302blcklists0",
    "308enbsd",
    "308jbf",
    "314glprompts0",
    "linkimgintf",
    "perfinstcf",
    "revdv3cf",
    "scfraithct",
    "sempserpnolen",
    "sydperfinput",
    "308sdcnt2",
    "scraith70",
];

const ALLOWED_MESSAGE_TYPES: &[&str] = &[
    "Chat",
    "InternalSearchQuery",
    "InternalSearchResult",
    "Disengaged",
    "InternalLoaderMessage",
    "RenderCardRequest",
    "AdsQuery",
    "SemanticSerp",
    "GenerateContentQuery",
    "SearchQuery",
];

const NO_SLICE_IDS: &[&str] = &[];

const TRACE_ID_LEN: usize = 32;
const INVOCATION_TYPE: u8 = 4;

/// The single invocation record sent over the hub for one exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub arguments: Vec<InvocationArguments>,
    pub invocation_id: String,
    pub target: &'static str,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationArguments {
    pub source: &'static str,
    pub options_sets: Vec<&'static str>,
    pub allowed_message_types: &'static [&'static str],
    pub slice_ids: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub is_start_of_session: bool,
    pub message: OutgoingMessage,
    pub conversation_signature: String,
    pub participant: Participant,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_messages: Option<Vec<PreviousMessage>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub author: &'static str,
    pub text: String,
    pub message_type: &'static str,
    pub input_method: &'static str,
    pub locale: String,
    pub market: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviousMessage {
    pub text: String,
    pub author: &'static str,
}

/// Inputs of [`build_invocation`] that vary per exchange.
pub struct InvocationInput<'a> {
    pub mode: ExchangeMode,
    pub session: &'a Session,
    pub invocation_id: u32,
    pub text: &'a str,
    pub previous_context: Option<String>,
}

/// Build the outgoing invocation for one exchange.
#[must_use]
pub fn build_invocation(input: InvocationInput<'_>, service: &ServiceConfig) -> InvocationRequest {
    let start_of_session = input.invocation_id == 0;
    let (options_sets, slice_ids, trace_id, text) = match input.mode {
        ExchangeMode::Chat { tone } => {
            let mut options_sets = BASE_OPTION_SETS.to_vec();
            options_sets.push(tone.option_set());
            options_sets.extend_from_slice(CHAT_EXTRA_OPTION_SETS);
            (
                options_sets,
                CHAT_SLICE_IDS,
                Some(random_hex(TRACE_ID_LEN)),
                input.text.to_string(),
            )
        }
        ExchangeMode::Compose {
            tone,
            format,
            length,
        } => {
            let mut options_sets = BASE_OPTION_SETS.to_vec();
            options_sets.extend_from_slice(COMPOSE_OPTION_SETS);
            let text = if start_of_session {
                compose_prompt(input.text, tone, format, length)
            } else {
                input.text.to_string()
            };
            (options_sets, NO_SLICE_IDS, None, text)
        }
    };

    let previous_messages = input.previous_context.map(|text| {
        vec![PreviousMessage {
            text,
            author: "bot",
        }]
    });

    InvocationRequest {
        arguments: vec![InvocationArguments {
            source: "cib",
            options_sets,
            allowed_message_types: ALLOWED_MESSAGE_TYPES,
            slice_ids,
            trace_id,
            is_start_of_session: start_of_session,
            message: OutgoingMessage {
                author: "user",
                text,
                message_type: "Chat",
                input_method: "Keyboard",
                locale: service.locale.clone(),
                market: service.market.clone(),
                region: service.region.clone(),
            },
            conversation_signature: input.session.conversation_signature.clone(),
            participant: Participant {
                id: input.session.client_id.clone(),
            },
            conversation_id: input.session.conversation_id.clone(),
            previous_messages,
        }],
        invocation_id: input.invocation_id.to_string(),
        target: "chat",
        kind: INVOCATION_TYPE,
    }
}

/// Wrap the user's text into the templated compose prompt.
#[must_use]
pub fn compose_prompt(
    text: &str,
    tone: ComposeTone,
    format: ComposeFormat,
    length: ComposeLength,
) -> String {
    format!(
        "Please write a *{length}* *{format}* in a *{tone}* style about `{text}`. \
         Please wrap the blog post in a markdown codeblock."
    )
}
