/// Result of appending one chunk to a [`BodyInspector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Bytes of the chunk that fit under the limit.
    pub buffered: usize,
    /// True once the buffer is full and the rest of the chunk was dropped.
    pub limit_reached: bool,
}

/// Accumulates a request or response body up to a fixed size.
pub struct BodyInspector {
    pub max_body_size: usize,
    buffer: Vec<u8>,
}

impl BodyInspector {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            max_body_size,
            buffer: Vec::new(),
        }
    }

    pub fn append_chunk(&mut self, chunk: &[u8]) -> Appended {
        let room = self.max_body_size.saturating_sub(self.buffer.len());
        let take = room.min(chunk.len());
        self.buffer.extend_from_slice(&chunk[..take]);

        Appended {
            buffered: take,
            limit_reached: chunk.len() > room,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Body as text for rule matching. Invalid UTF-8 is replaced, not rejected.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.buffer.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_under_limit() {
        let mut inspector = BodyInspector::new(16);
        let appended = inspector.append_chunk(b"hello");
        assert_eq!(appended.buffered, 5);
        assert!(!appended.limit_reached);
        assert_eq!(inspector.as_text(), "hello");
    }

    #[test]
    fn test_exact_limit_is_not_exceeded() {
        let mut inspector = BodyInspector::new(5);
        let appended = inspector.append_chunk(b"hello");
        assert_eq!(appended.buffered, 5);
        assert!(!appended.limit_reached);
    }

    #[test]
    fn test_truncates_at_limit() {
        let mut inspector = BodyInspector::new(8);
        inspector.append_chunk(b"hello");
        let appended = inspector.append_chunk(b" world");
        assert_eq!(appended.buffered, 3);
        assert!(appended.limit_reached);
        assert_eq!(inspector.as_text(), "hello wo");

        let appended = inspector.append_chunk(b"!");
        assert_eq!(appended.buffered, 0);
        assert!(appended.limit_reached);
    }

    #[test]
    fn test_clear() {
        let mut inspector = BodyInspector::new(8);
        inspector.append_chunk(b"abc");
        inspector.clear();
        assert!(inspector.is_empty());
    }
}
