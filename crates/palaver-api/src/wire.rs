//! Loose decoding of wire event envelopes into the typed event union.
//!
//! The backend ships events as JSON objects with a `type` tag and a flat
//! payload. Payloads are validated loosely: optional fields may be absent
//! (a streaming start without a role is an assistant turn, a missing
//! conversation id means "the active conversation"), but unknown kinds are
//! rejected so they can be logged rather than silently ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::DecodeError;
use crate::event::ClientEvent;
use crate::types::{
    Attachment, AttachmentId, Conversation, ConversationId, Message, MessageId, Role, ToolCallId,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationEnvelope {
    conversation: Conversation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRef {
    conversation_id: ConversationId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageEnvelope {
    message: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextStartPayload {
    message_id: MessageId,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextContentPayload {
    message_id: MessageId,
    #[serde(default)]
    delta: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRefPayload {
    message_id: MessageId,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolStartPayload {
    tool_call_id: ToolCallId,
    #[serde(default)]
    name: String,
    message_id: MessageId,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolArgsPayload {
    tool_call_id: ToolCallId,
    #[serde(default)]
    delta: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolRefPayload {
    tool_call_id: ToolCallId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPayload {
    tool_call_id: ToolCallId,
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentEnvelope {
    attachment: Attachment,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentProgressPayload {
    attachment_id: AttachmentId,
    #[serde(default)]
    progress: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentFailedPayload {
    attachment_id: AttachmentId,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPayload {
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    state: serde_json::Map<String, serde_json::Value>,
}

fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(value)?)
}

/// Decode one wire envelope. The envelope itself is consumed; the `type` tag
/// selects the payload shape.
pub fn decode_event(value: serde_json::Value) -> Result<ClientEvent, DecodeError> {
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingKind)?
        .to_string();

    let event = match kind.as_str() {
        "conversation.created" => ClientEvent::ConversationCreated {
            conversation: parse::<ConversationEnvelope>(value)?.conversation,
        },
        "conversation.updated" => ClientEvent::ConversationUpdated {
            conversation: parse::<ConversationEnvelope>(value)?.conversation,
        },
        "conversation.archived" => ClientEvent::ConversationArchived {
            conversation_id: parse::<ConversationRef>(value)?.conversation_id,
        },
        "message.created" => ClientEvent::MessageCreated {
            message: parse::<MessageEnvelope>(value)?.message,
        },
        "TEXT_MESSAGE_START" => {
            let p: TextStartPayload = parse(value)?;
            ClientEvent::TextMessageStart {
                message_id: p.message_id,
                conversation_id: p.conversation_id,
                role: p.role,
                created_at: p.created_at,
            }
        }
        "TEXT_MESSAGE_CONTENT" => {
            let p: TextContentPayload = parse(value)?;
            ClientEvent::TextMessageContent {
                message_id: p.message_id,
                delta: p.delta,
            }
        }
        "TEXT_MESSAGE_END" => ClientEvent::TextMessageEnd {
            message_id: parse::<MessageRefPayload>(value)?.message_id,
        },
        "message.errored" => {
            let p: MessageRefPayload = parse(value)?;
            ClientEvent::MessageErrored {
                message_id: p.message_id,
                error: p.error.unwrap_or_default(),
            }
        }
        "message.canceled" => ClientEvent::MessageCanceled {
            message_id: parse::<MessageRefPayload>(value)?.message_id,
        },
        "TOOL_CALL_START" => {
            let p: ToolStartPayload = parse(value)?;
            ClientEvent::ToolCallStart {
                tool_call_id: p.tool_call_id,
                name: p.name,
                message_id: p.message_id,
                conversation_id: p.conversation_id,
            }
        }
        "TOOL_CALL_ARGS" => {
            let p: ToolArgsPayload = parse(value)?;
            ClientEvent::ToolCallArgs {
                tool_call_id: p.tool_call_id,
                delta: p.delta,
            }
        }
        "TOOL_CALL_END" => ClientEvent::ToolCallEnd {
            tool_call_id: parse::<ToolRefPayload>(value)?.tool_call_id,
        },
        "TOOL_CALL_RESULT" => {
            let p: ToolResultPayload = parse(value)?;
            ClientEvent::ToolCallResult {
                tool_call_id: p.tool_call_id,
                message_id: p.message_id,
                conversation_id: p.conversation_id,
                content: p.content,
            }
        }
        "attachment.uploading" => ClientEvent::AttachmentUploading {
            attachment: parse::<AttachmentEnvelope>(value)?.attachment,
        },
        "attachment.progress" => {
            let p: AttachmentProgressPayload = parse(value)?;
            ClientEvent::AttachmentProgress {
                attachment_id: p.attachment_id,
                progress: p.progress,
            }
        }
        "attachment.available" => ClientEvent::AttachmentAvailable {
            attachment: parse::<AttachmentEnvelope>(value)?.attachment,
        },
        "attachment.failed" => {
            let p: AttachmentFailedPayload = parse(value)?;
            ClientEvent::AttachmentFailed {
                attachment_id: p.attachment_id,
                error: p.error,
            }
        }
        "STATE_SNAPSHOT" => {
            let p: SnapshotPayload = parse(value)?;
            ClientEvent::StateSnapshot {
                conversation_id: p.conversation_id,
                state: p.state,
            }
        }
        _ => return Err(DecodeError::UnknownKind { kind }),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_text_message_start_with_missing_optionals() {
        let event = decode_event(json!({
            "type": "TEXT_MESSAGE_START",
            "messageId": "m1"
        }))
        .unwrap();

        let ClientEvent::TextMessageStart {
            message_id,
            conversation_id,
            role,
            ..
        } = event
        else {
            unreachable!("expected TextMessageStart")
        };
        assert_eq!(message_id.as_str(), "m1");
        assert!(conversation_id.is_none());
        assert_eq!(role, Role::Assistant);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = decode_event(json!({ "type": "SOMETHING_NEW" })).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind { kind } if kind == "SOMETHING_NEW"));
    }

    #[test]
    fn rejects_missing_type_tag() {
        let err = decode_event(json!({ "messageId": "m1" })).unwrap_err();
        assert!(matches!(err, DecodeError::MissingKind));
    }

    #[test]
    fn decodes_snapshot_with_state_bag() {
        let event = decode_event(json!({
            "type": "STATE_SNAPSHOT",
            "conversationId": "c1",
            "state": { "suggestedQuestions": ["q1"] }
        }))
        .unwrap();

        let ClientEvent::StateSnapshot {
            conversation_id,
            state,
        } = event
        else {
            unreachable!("expected StateSnapshot")
        };
        assert_eq!(conversation_id.unwrap().as_str(), "c1");
        assert_eq!(state["suggestedQuestions"], json!(["q1"]));
    }
}
