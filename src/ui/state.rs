use crate::common::events::SyncStatus;
use crate::common::types::{
    Collection, Message, MessageReaction, Reaction, ReactionKind, SYSTEM_USER,
};

/// Trạng thái cục bộ của UI, mirror từ các sự kiện engine.
pub struct AppState {
    pub room_id: String,
    pub user_id: String,
    pub status: SyncStatus,
    pub messages: Vec<DisplayMessage>,
    pub reactions: Vec<Reaction>,
    pub message_reactions: Vec<MessageReaction>,
    pub input_text: String,
}

/// A message plus the render-only flag derived from the local identity.
#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub message: Message,
    pub is_sender: bool,
}

impl AppState {
    pub fn new(room_id: String, user_id: String) -> Self {
        Self {
            room_id,
            user_id,
            status: SyncStatus::Connecting,
            messages: Vec::new(),
            reactions: Vec::new(),
            message_reactions: Vec::new(),
            input_text: String::new(),
        }
    }

    pub fn apply_snapshot(
        &mut self,
        messages: Vec<Message>,
        reactions: Vec<Reaction>,
        message_reactions: Vec<MessageReaction>,
    ) {
        self.messages = messages
            .into_iter()
            .map(|message| self.as_display(message))
            .collect();
        sort_by_timestamp(&mut self.messages);
        self.reactions = reactions;
        self.message_reactions = message_reactions;
    }

    /// Feed arrival order need not match timestamp order, so the list is
    /// re-sorted after every insert.
    pub fn push_message(&mut self, message: Message) {
        if self.messages.iter().any(|m| m.message.id == message.id) {
            return;
        }
        let display = self.as_display(message);
        self.messages.push(display);
        sort_by_timestamp(&mut self.messages);
    }

    pub fn push_reaction(&mut self, reaction: Reaction) {
        if !self.reactions.iter().any(|r| r.id == reaction.id) {
            self.reactions.push(reaction);
        }
    }

    pub fn push_message_reaction(&mut self, reaction: MessageReaction) {
        if !self.message_reactions.iter().any(|r| r.id == reaction.id) {
            self.message_reactions.push(reaction);
        }
    }

    pub fn remove(&mut self, collection: Collection, id: &str) {
        match collection {
            Collection::Messages => self.messages.retain(|m| m.message.id != id),
            Collection::Reactions => self.reactions.retain(|r| r.id != id),
            Collection::MessageReactions => self.message_reactions.retain(|r| r.id != id),
        }
    }

    pub fn reactions_for(&self, message_id: &str) -> Vec<&MessageReaction> {
        self.message_reactions
            .iter()
            .filter(|r| r.message_id == message_id)
            .collect()
    }

    pub fn reaction_count(&self, kind: ReactionKind) -> usize {
        self.reactions.iter().filter(|r| r.kind == kind).count()
    }

    /// Display names known from message history, for the sidebar.
    pub fn participants(&self) -> Vec<(String, bool)> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out: Vec<(String, bool)> = Vec::new();
        for dm in &self.messages {
            let message = &dm.message;
            if message.user_id.is_empty() || message.user_id == SYSTEM_USER {
                continue;
            }
            if seen.contains(&message.user_id.as_str()) {
                continue;
            }
            seen.push(&message.user_id);
            let display = if message.is_host {
                message
                    .host_name
                    .clone()
                    .unwrap_or_else(|| message.user_id.clone())
            } else {
                message.user_id.clone()
            };
            out.push((display, message.is_host));
        }
        out
    }

    fn as_display(&self, message: Message) -> DisplayMessage {
        let is_sender = message.user_id == self.user_id;
        DisplayMessage { message, is_sender }
    }
}

fn sort_by_timestamp(messages: &mut [DisplayMessage]) {
    messages.sort_by(|a, b| {
        let left = chrono::DateTime::parse_from_rfc3339(&a.message.timestamp).ok();
        let right = chrono::DateTime::parse_from_rfc3339(&b.message.timestamp).ok();
        match (left, right) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => a.message.timestamp.cmp(&b.message.timestamp),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, user_id: &str, timestamp: &str) -> Message {
        Message {
            id: id.to_string(),
            room_id: "demo".to_string(),
            user_id: user_id.to_string(),
            text: "hi".to_string(),
            timestamp: timestamp.to_string(),
            is_host: false,
            host_name: None,
            mentions: Vec::new(),
        }
    }

    #[test]
    fn out_of_order_feed_inserts_are_sorted_by_timestamp() {
        let mut state = AppState::new("demo".to_string(), "me".to_string());
        state.push_message(message("m2", "a", "2024-01-01T00:00:02.000Z"));
        state.push_message(message("m1", "b", "2024-01-01T00:00:01.000Z"));

        let ids: Vec<&str> = state
            .messages
            .iter()
            .map(|m| m.message.id.as_str())
            .collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn own_messages_are_flagged_as_sender() {
        let mut state = AppState::new("demo".to_string(), "me".to_string());
        state.push_message(message("m1", "me", "2024-01-01T00:00:00.000Z"));
        state.push_message(message("m2", "them", "2024-01-01T00:00:01.000Z"));

        assert!(state.messages[0].is_sender);
        assert!(!state.messages[1].is_sender);
    }

    #[test]
    fn system_sender_is_not_a_participant() {
        let mut state = AppState::new("demo".to_string(), "me".to_string());
        state.push_message(message("m0", SYSTEM_USER, "2024-01-01T00:00:00.000Z"));
        state.push_message(message("m1", "them", "2024-01-01T00:00:01.000Z"));

        assert_eq!(state.participants(), vec![("them".to_string(), false)]);
    }
}
