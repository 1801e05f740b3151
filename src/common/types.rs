use serde::{Deserialize, Deserializer, Serialize};

/// Sender id of synthetic messages (demo-mode notice).
pub const SYSTEM_USER: &str = "system";

/// Domain model đại diện một tin nhắn chat trong phòng.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub text: String,
    /// RFC 3339, gán phía client lúc gửi.
    pub timestamp: String,
    pub is_host: bool,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub mentions: Vec<String>,
}

/// Reaction cho cả phòng (không nhắm vào tin nhắn nào).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub room_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub timestamp: String,
}

/// Reaction nhắm vào một tin nhắn cụ thể.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub id: String,
    pub room_id: String,
    pub message_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Idea,
    Question,
    Confused,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 4] = [
        ReactionKind::Like,
        ReactionKind::Idea,
        ReactionKind::Question,
        ReactionKind::Confused,
    ];

    pub fn emoji(self) -> &'static str {
        match self {
            ReactionKind::Like => "👍",
            ReactionKind::Idea => "💡",
            ReactionKind::Question => "🙋",
            ReactionKind::Confused => "😵",
        }
    }
}

/// Ba collection mà một phòng đồng bộ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Messages,
    Reactions,
    MessageReactions,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Messages,
        Collection::Reactions,
        Collection::MessageReactions,
    ];

    /// Table name on the backend.
    pub fn table(self) -> &'static str {
        match self {
            Collection::Messages => "messages",
            Collection::Reactions => "reactions",
            Collection::MessageReactions => "message_reactions",
        }
    }
}

/// Một row bất kỳ trong ba collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    Message(Message),
    Reaction(Reaction),
    MessageReaction(MessageReaction),
}

impl Row {
    pub fn id(&self) -> &str {
        match self {
            Row::Message(m) => &m.id,
            Row::Reaction(r) => &r.id,
            Row::MessageReaction(r) => &r.id,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Row::Message(_) => Collection::Messages,
            Row::Reaction(_) => Collection::Reactions,
            Row::MessageReaction(_) => Collection::MessageReactions,
        }
    }

    /// Decode a raw backend row into the collection's model.
    pub fn decode(collection: Collection, value: serde_json::Value) -> serde_json::Result<Row> {
        Ok(match collection {
            Collection::Messages => Row::Message(serde_json::from_value(value)?),
            Collection::Reactions => Row::Reaction(serde_json::from_value(value)?),
            Collection::MessageReactions => Row::MessageReaction(serde_json::from_value(value)?),
        })
    }
}

// Postgres trả `null` cho mảng chưa set; coi như rỗng.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}
