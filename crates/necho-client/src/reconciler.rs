//! Merging of history, live pushes and locally sent messages into one
//! timeline per chat.

use necho_types::{now_millis, ChatId, Message, MessageId, MessageKind, SendMessage, UserId};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Prefix of the temporary id given to locally sent messages.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A locally originated message the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticMessage {
    /// Local id, `temp-<uuid>`.
    pub temp_id: String,
    /// Correlation key sent with the command and echoed in the confirmation.
    pub client_ref: String,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<MessageId>,
    /// Local send time (Unix millis).
    pub created_at: u64,
}

impl OptimisticMessage {
    /// Whether the id was assigned locally.
    pub fn is_optimistic(&self) -> bool {
        self.temp_id.starts_with(TEMP_ID_PREFIX)
    }
}

/// One row of a merged timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    /// Server-confirmed.
    Confirmed(Message),
    /// Sent locally and still awaiting confirmation.
    Pending(OptimisticMessage),
}

impl TimelineEntry {
    /// Server id for confirmed rows, temporary id for pending ones.
    pub fn id(&self) -> &str {
        match self {
            TimelineEntry::Confirmed(m) => &m.id,
            TimelineEntry::Pending(m) => &m.temp_id,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            TimelineEntry::Confirmed(m) => m.created_at,
            TimelineEntry::Pending(m) => m.created_at,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            TimelineEntry::Confirmed(m) => &m.content,
            TimelineEntry::Pending(m) => &m.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TimelineEntry::Pending(_))
    }
}

#[derive(Debug, Default)]
struct ChatTimeline {
    /// Confirmed messages by id, with their first-arrival sequence.
    confirmed: HashMap<MessageId, (u64, Message)>,
    /// Ids deleted by a live event; late copies of them are ignored.
    deleted: HashSet<MessageId>,
    /// Unconfirmed sends in send order.
    optimistic: Vec<(u64, OptimisticMessage)>,
}

impl ChatTimeline {
    fn upsert(&mut self, seq: u64, message: Message) {
        if self.deleted.contains(&message.id) {
            return;
        }
        if let Some(ref client_ref) = message.client_ref {
            self.optimistic.retain(|(_, o)| &o.client_ref != client_ref);
        }
        match self.confirmed.get_mut(&message.id) {
            Some((_, existing)) => {
                // Never let an older copy overwrite a newer edit
                if message.edited_at.unwrap_or(0) >= existing.edited_at.unwrap_or(0) {
                    *existing = message;
                }
            }
            None => {
                self.confirmed.insert(message.id.clone(), (seq, message));
            }
        }
    }

    /// Optimistic entries no confirmed message accounts for. Entries matched
    /// by `client_ref` were already removed in `upsert`.
    fn unmatched(&self) -> Vec<&(u64, OptimisticMessage)> {
        // Confirmed messages without a correlation key can each absorb one
        // optimistic entry with the same author and content.
        let mut uncorrelated: Vec<(u64, &Message)> = self
            .confirmed
            .values()
            .filter(|(_, m)| m.client_ref.is_none())
            .map(|(seq, m)| (*seq, m))
            .collect();
        uncorrelated.sort_by_key(|(seq, m)| (m.created_at, *seq));
        let mut claimed = vec![false; uncorrelated.len()];

        self.optimistic
            .iter()
            .filter(|(_, o)| {
                let hit = uncorrelated.iter().enumerate().position(|(i, (_, m))| {
                    !claimed[i] && m.sender_id == o.sender_id && m.content == o.content
                });
                match hit {
                    Some(i) => {
                        claimed[i] = true;
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }
}

/// Per-chat merge of confirmed and optimistic messages.
///
/// Confirmed messages are unioned by id. An optimistic entry disappears once a
/// confirmed message carries its `client_ref`, or, for confirmations without
/// one, once a confirmed message from the same sender with the same content
/// exists that no other optimistic entry has already claimed.
#[derive(Debug, Default)]
pub struct OptimisticReconciler {
    chats: HashMap<ChatId, ChatTimeline>,
    next_seq: u64,
}

impl OptimisticReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn chat_mut(&mut self, chat_id: &str) -> &mut ChatTimeline {
        self.chats.entry(chat_id.to_string()).or_default()
    }

    // ==================== Confirmed sources ====================

    /// Add a page of fetched history.
    pub fn add_history_page(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            let seq = self.seq();
            self.chat_mut(&message.chat_id.clone()).upsert(seq, message);
        }
    }

    /// Apply a pushed `new-message`.
    pub fn apply_live_new(&mut self, message: Message) {
        let seq = self.seq();
        self.chat_mut(&message.chat_id.clone()).upsert(seq, message);
    }

    /// Apply a pushed `message-edited`.
    pub fn apply_live_edit(&mut self, message: Message) {
        self.apply_live_new(message);
    }

    /// Apply a pushed `message-deleted`.
    pub fn apply_live_delete(&mut self, chat_id: &str, message_id: &str) {
        let chat = self.chat_mut(chat_id);
        chat.confirmed.remove(message_id);
        chat.deleted.insert(message_id.to_string());
    }

    // ==================== Optimistic sends ====================

    /// Record a local send. Returns the pending entry and the payload to send,
    /// which always carries the entry's `client_ref`.
    pub fn add_optimistic(
        &mut self,
        sender_id: &str,
        mut payload: SendMessage,
    ) -> (OptimisticMessage, SendMessage) {
        let client_ref = payload
            .client_ref
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let entry = OptimisticMessage {
            temp_id: format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()),
            client_ref,
            chat_id: payload.chat_id.clone(),
            sender_id: sender_id.to_string(),
            content: payload.content.clone(),
            kind: payload.kind,
            reply_to_id: payload.reply_to_id.clone(),
            created_at: now_millis(),
        };

        let seq = self.seq();
        self.chat_mut(&entry.chat_id)
            .optimistic
            .push((seq, entry.clone()));
        (entry, payload)
    }

    /// Replace a pending entry with the server's confirmation.
    pub fn confirm(&mut self, temp_id: &str, message: Message) {
        self.remove_optimistic(temp_id);
        self.apply_live_new(message);
    }

    /// Drop a pending entry whose send was rejected or timed out.
    pub fn fail(&mut self, temp_id: &str) -> bool {
        self.remove_optimistic(temp_id)
    }

    fn remove_optimistic(&mut self, temp_id: &str) -> bool {
        for chat in self.chats.values_mut() {
            if let Some(pos) = chat.optimistic.iter().position(|(_, o)| o.temp_id == temp_id) {
                chat.optimistic.remove(pos);
                return true;
            }
        }
        false
    }

    // ==================== Views ====================

    /// The merged timeline of a chat, oldest first.
    pub fn merged(&self, chat_id: &str) -> Vec<TimelineEntry> {
        let Some(chat) = self.chats.get(chat_id) else {
            return Vec::new();
        };

        let mut rows: Vec<(u64, u64, TimelineEntry)> = chat
            .confirmed
            .values()
            .map(|(seq, m)| (m.created_at, *seq, TimelineEntry::Confirmed(m.clone())))
            .chain(
                chat.unmatched()
                    .into_iter()
                    .map(|(seq, o)| (o.created_at, *seq, TimelineEntry::Pending(o.clone()))),
            )
            .collect();
        rows.sort_by_key(|(created_at, seq, _)| (*created_at, *seq));
        rows.into_iter().map(|(_, _, entry)| entry).collect()
    }

    /// Confirmed message by id.
    pub fn get(&self, chat_id: &str, message_id: &str) -> Option<&Message> {
        self.chats
            .get(chat_id)?
            .confirmed
            .get(message_id)
            .map(|(_, m)| m)
    }

    /// Number of pending rows the merged view would show.
    pub fn pending_count(&self, chat_id: &str) -> usize {
        self.chats
            .get(chat_id)
            .map(|chat| chat.unmatched().len())
            .unwrap_or(0)
    }

    /// Number of confirmed messages held for a chat.
    pub fn confirmed_count(&self, chat_id: &str) -> usize {
        self.chats
            .get(chat_id)
            .map(|chat| chat.confirmed.len())
            .unwrap_or(0)
    }

    /// Forget everything held for a chat.
    pub fn clear_chat(&mut self, chat_id: &str) {
        self.chats.remove(chat_id);
    }
}
