use chrono::{ DateTime, Utc };

use crate::models::chat::{ ChatMessage, Role };

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Shown to the user but never sent to the gateway.
    pub synthetic: bool,
}

/// Client-held, append-only transcript of one chat widget.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Conversation {
    pub fn with_greeting(greeting: &str) -> Self {
        let mut conversation = Self::default();
        conversation.push(Role::Assistant, greeting.to_string(), true);
        conversation
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn get(&self, id: u64) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> u64 {
        self.push(Role::User, text.into(), false)
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) -> u64 {
        self.push(Role::Assistant, text.into(), false)
    }

    /// Replaces the text of entry `id`, or appends an assistant entry under
    /// that id if none exists yet.
    pub fn upsert_assistant(&mut self, id: u64, text: &str) {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.text.clear();
                entry.text.push_str(text);
            }
            None => {
                self.entries.push(Entry {
                    id,
                    role: Role::Assistant,
                    text: text.to_string(),
                    timestamp: Utc::now(),
                    synthetic: false,
                });
                self.next_id = self.next_id.max(id + 1);
            }
        }
    }

    pub fn append_text(&mut self, id: u64, token: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.text.push_str(token);
                true
            }
            None => false,
        }
    }

    /// Reserves the id the next appended entry would get.
    pub fn reserve_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Gateway payload: every real entry in order, greeting excluded.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| !e.synthetic)
            .map(|e| ChatMessage::new(e.role, e.text.clone()))
            .collect()
    }

    fn push(&mut self, role: Role, text: String, synthetic: bool) -> u64 {
        let id = self.reserve_id();
        self.entries.push(Entry {
            id,
            role,
            text,
            timestamp: Utc::now(),
            synthetic,
        });
        id
    }
}
