use bytes::Bytes;

/// A batch of serialized events, ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// A JSON array holding every event.
    pub payload: Bytes,
    pub events: usize,
}

/// Accumulates serialized events into a JSON array.
///
/// Not synchronized. Owned exclusively by the buffer controller task.
#[derive(Debug, Default)]
pub struct EventBuffer {
    data: Vec<u8>,
    count: usize,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event. `event` must be a complete JSON value.
    pub fn write(&mut self, event: &[u8]) {
        self.data.extend_from_slice(event);
        self.data.push(b',');
        self.count += 1;
    }

    /// `(event count, buffered bytes)`, separators included.
    pub fn size(&self) -> (usize, usize) {
        (self.count, self.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drains the buffer into a batch. `None` when there is nothing to send.
    pub fn take_all(&mut self) -> Option<Batch> {
        if self.count == 0 {
            return None;
        }

        // Drop the trailing separator
        self.data.pop();
        let mut payload = Vec::with_capacity(self.data.len() + 2);
        payload.push(b'[');
        payload.extend_from_slice(&self.data);
        payload.push(b']');

        let batch = Batch {
            payload: Bytes::from(payload),
            events: self.count,
        };
        self.data.clear();
        self.count = 0;
        Some(batch)
    }
}
