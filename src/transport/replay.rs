//! Replay-on-subscribe buffer
//!
//! Device-channel messages can arrive before anything has subscribed to
//! their event (a device answers a metadata request while the console is
//! still wiring itself up). Such messages are parked here and handed, in
//! arrival order, to the first subscriber of their event.
//!
//! The buffer is bounded both by message count and by payload bytes; when
//! either bound is hit the oldest messages are dropped first.

use std::collections::VecDeque;

use super::message::ChannelMessage;

/// Default maximum number of parked messages
pub const DEFAULT_REPLAY_MESSAGES: usize = 256;

/// Default maximum parked payload bytes (1 MiB)
pub const DEFAULT_REPLAY_BYTES: usize = 1024 * 1024;

/// Bounded FIFO of messages awaiting a subscriber
#[derive(Debug)]
pub struct ReplayBuffer {
    max_messages: usize,
    max_bytes: usize,
    current_bytes: usize,
    messages: VecDeque<ChannelMessage>,
    /// Messages evicted to make room
    dropped: u64,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_REPLAY_MESSAGES, DEFAULT_REPLAY_BYTES)
    }

    pub fn with_limits(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            max_messages,
            max_bytes,
            current_bytes: 0,
            messages: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Park a message
    ///
    /// Evicts the oldest messages if needed. Returns false if the message
    /// alone exceeds the byte bound (or the buffer is disabled).
    pub fn push(&mut self, message: ChannelMessage) -> bool {
        let size = message.size();

        if self.max_messages == 0 || size > self.max_bytes {
            self.dropped += 1;
            return false;
        }

        while self.messages.len() >= self.max_messages
            || self.current_bytes + size > self.max_bytes
        {
            match self.messages.pop_front() {
                Some(old) => {
                    self.current_bytes -= old.size();
                    self.dropped += 1;
                    tracing::debug!(event = %old.name, "Replay buffer full, dropped oldest message");
                }
                None => break,
            }
        }

        self.current_bytes += size;
        self.messages.push_back(message);
        true
    }

    /// Remove and return every parked message for an event, oldest first
    pub fn take_event(&mut self, event: &str) -> Vec<ChannelMessage> {
        self.take_matching(|name| name == event)
    }

    /// Remove and return every parked message whose event name matches, oldest first
    pub fn take_matching<F>(&mut self, mut matches: F) -> Vec<ChannelMessage>
    where
        F: FnMut(&str) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.messages.len());

        for message in self.messages.drain(..) {
            if matches(&message.name) {
                self.current_bytes -= message.size();
                taken.push(message);
            } else {
                kept.push_back(message);
            }
        }

        self.messages = kept;
        taken
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.messages.clear();
        self.current_bytes = 0;
    }

    /// Number of parked messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Parked payload bytes
    pub fn size(&self) -> usize {
        self.current_bytes
    }

    /// Total messages evicted or rejected
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(name: &str, body: &'static str) -> ChannelMessage {
        ChannelMessage::new("studio-devices", name, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn test_take_event_preserves_order() {
        let mut buffer = ReplayBuffer::new();
        buffer.push(msg("devices-list", "1"));
        buffer.push(msg("other", "x"));
        buffer.push(msg("devices-list", "2"));

        let taken = buffer.take_event("devices-list");
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].data, Bytes::from_static(b"1"));
        assert_eq!(taken[1].data, Bytes::from_static(b"2"));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.size(), 1);
        assert!(buffer.take_event("devices-list").is_empty());
    }

    #[test]
    fn test_message_bound_drops_oldest() {
        let mut buffer = ReplayBuffer::with_limits(2, 1024);
        buffer.push(msg("e", "a"));
        buffer.push(msg("e", "b"));
        buffer.push(msg("e", "c"));

        let taken = buffer.take_event("e");
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].data, Bytes::from_static(b"b"));
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn test_byte_bound() {
        let mut buffer = ReplayBuffer::with_limits(16, 6);
        assert!(buffer.push(msg("e", "abc")));
        assert!(buffer.push(msg("e", "def")));
        assert!(buffer.push(msg("e", "g")));

        // "abc" evicted to make room
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.size(), 4);

        assert!(!buffer.push(msg("e", "too long")));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut buffer = ReplayBuffer::new();
        buffer.push(msg("e", "abc"));
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.size(), 0);
    }
}
