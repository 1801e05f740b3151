use crate::common::types::{Collection, Message, MessageReaction, Reaction, Row};

/// In-memory state of the room currently open: three insertion-ordered
/// collections, deduplicated by row id. Snapshot loads replace a collection
/// wholesale, feed/optimistic inserts append, rollback removes. All
/// operations are synchronous; the engine owns the store and is the only
/// mutator.
#[derive(Debug, Default)]
pub struct RoomStore {
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    message_reactions: Vec<MessageReaction>,
}

/// A participant as known from message history. `display` is the host name
/// for host messages, otherwise the raw handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: String,
    pub display: String,
    pub is_host: bool,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn message_reactions(&self) -> &[MessageReaction] {
        &self.message_reactions
    }

    /// Append a row unless a row with the same id is already present.
    /// Returns whether the row was new. Both the optimistic copy and the
    /// feed echo of the same write go through here, as do at-least-once
    /// redeliveries from the feed, so this must stay idempotent.
    pub fn append(&mut self, row: Row) -> bool {
        if self.contains(row.collection(), row.id()) {
            return false;
        }
        match row {
            Row::Message(m) => self.messages.push(m),
            Row::Reaction(r) => self.reactions.push(r),
            Row::MessageReaction(r) => self.message_reactions.push(r),
        }
        true
    }

    /// Install a fetched snapshot for one collection. Callers only invoke
    /// this on fetch success; a failed fetch keeps the previous contents.
    pub fn replace_all(&mut self, collection: Collection, rows: Vec<Row>) {
        match collection {
            Collection::Messages => self.messages.clear(),
            Collection::Reactions => self.reactions.clear(),
            Collection::MessageReactions => self.message_reactions.clear(),
        }
        for row in rows {
            if row.collection() != collection {
                log::warn!(
                    "Dropping row {} from snapshot: wrong collection",
                    row.id()
                );
                continue;
            }
            self.append(row);
        }
    }

    /// Remove a row by id, preserving the order of everything else.
    /// Only used to roll back a rejected optimistic write.
    pub fn remove(&mut self, collection: Collection, id: &str) -> Option<Row> {
        match collection {
            Collection::Messages => {
                let index = self.messages.iter().position(|m| m.id == id)?;
                Some(Row::Message(self.messages.remove(index)))
            }
            Collection::Reactions => {
                let index = self.reactions.iter().position(|r| r.id == id)?;
                Some(Row::Reaction(self.reactions.remove(index)))
            }
            Collection::MessageReactions => {
                let index = self.message_reactions.iter().position(|r| r.id == id)?;
                Some(Row::MessageReaction(self.message_reactions.remove(index)))
            }
        }
    }

    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        match collection {
            Collection::Messages => self.messages.iter().any(|m| m.id == id),
            Collection::Reactions => self.reactions.iter().any(|r| r.id == id),
            Collection::MessageReactions => self.message_reactions.iter().any(|r| r.id == id),
        }
    }

    /// Participants known from message history, in order of first
    /// appearance. A later host message upgrades the display name in place.
    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> = Vec::new();
        for message in &self.messages {
            if message.user_id.is_empty() {
                continue;
            }
            let display = if message.is_host {
                message
                    .host_name
                    .clone()
                    .unwrap_or_else(|| message.user_id.clone())
            } else {
                message.user_id.clone()
            };
            match participants.iter_mut().find(|p| p.id == message.user_id) {
                Some(existing) => {
                    existing.display = display;
                    existing.is_host = message.is_host;
                }
                None => participants.push(Participant {
                    id: message.user_id.clone(),
                    display,
                    is_host: message.is_host,
                }),
            }
        }
        participants
    }
}
