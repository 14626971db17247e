use async_trait::async_trait;

/// Longest text sent as a single chat message.
pub const MAX_MESSAGE_LEN: usize = 500;

/// Outbound chat used by handlers to report results. Delivery is best-effort.
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    async fn send_chat_message(&self, text: &str);
}

/// Split long messages at a newline or space so each chunk fits `max_len`.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = text[start..]
                .char_indices()
                .nth(1)
                .map(|(i, _)| start + i)
                .unwrap_or(text.len());
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .filter(|&pos| pos > start + 1)
                .unwrap_or(end)
        } else {
            end
        };

        let chunk = text[start..actual_end].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        start = actual_end;
    }

    chunks
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every outbound message.
    #[derive(Default)]
    pub struct RecordingOutbound {
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingOutbound {
        pub async fn messages(&self) -> Vec<String> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl ChatOutbound for RecordingOutbound {
        async fn send_chat_message(&self, text: &str) {
            self.sent.lock().await.push(text.to_string());
        }
    }
}
