use crate::content::Message;

/// Append-only conversation history.
///
/// Insertion order is turn order. Role alternation is not checked here; a
/// caller may append consecutive messages with the same role. Messages are
/// only ever removed by replacing the whole history through [`reset`].
///
/// [`reset`]: Transcript::reset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message at the end of the history.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Read-only view of the history in insertion order.
    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the history; changes to it never reach the store.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Replaces the whole history.
    pub fn reset(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
