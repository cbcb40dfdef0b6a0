//! Last-write-wins update queue
//!
//! Pending section edits buffered while the channel is not flushable. One
//! entry per section: a newer edit overwrites the buffered one in place, so
//! only the latest content per section is ever sent. Entries keep their
//! original position, which preserves enqueue order across sections during
//! a flush pass.

use std::time::Instant;

use crate::error::TransportError;

/// The most recent not-yet-sent edit for one section.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub section_id: String,
    pub content: String,
    /// When this content was queued; newest write per section wins.
    pub queued_at: Instant,
}

/// Per-section last-write-wins buffer.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    entries: Vec<PendingUpdate>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `content` for `section_id`, superseding any buffered edit for
    /// the same section. No history is retained.
    pub fn enqueue(&mut self, section_id: &str, content: String) {
        let now = Instant::now();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.section_id == section_id)
        {
            entry.content = content;
            entry.queued_at = now;
            return;
        }
        self.entries.push(PendingUpdate {
            section_id: section_id.to_string(),
            content,
            queued_at: now,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Send every queued entry in enqueue order. An entry whose send fails
    /// is logged and dropped rather than retried, so one bad payload cannot
    /// wedge the queue. Returns the number of entries sent.
    pub fn flush<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(&PendingUpdate) -> Result<(), TransportError>,
    {
        let mut sent = 0;
        for entry in self.entries.drain(..) {
            match send(&entry) {
                Ok(()) => sent += 1,
                Err(err) => {
                    tracing::warn!(
                        section_id = %entry.section_id,
                        error = %err,
                        "dropping queued update after send failure"
                    );
                }
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins_per_section() {
        let mut queue = UpdateQueue::new();
        queue.enqueue("abstract", "a".to_string());
        queue.enqueue("abstract", "b".to_string());

        assert_eq!(queue.len(), 1);
        let mut sent = Vec::new();
        queue.flush(|entry| {
            sent.push((entry.section_id.clone(), entry.content.clone()));
            Ok(())
        });
        assert_eq!(sent, vec![("abstract".to_string(), "b".to_string())]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_preserves_enqueue_order_across_sections() {
        let mut queue = UpdateQueue::new();
        queue.enqueue("abstract", "1".to_string());
        queue.enqueue("methods", "2".to_string());
        queue.enqueue("abstract", "3".to_string());

        let mut order = Vec::new();
        queue.flush(|entry| {
            order.push(entry.section_id.clone());
            Ok(())
        });
        // Superseding an entry does not move it to the back.
        assert_eq!(order, vec!["abstract".to_string(), "methods".to_string()]);
    }

    #[test]
    fn test_failed_entry_is_dropped_without_blocking_others() {
        let mut queue = UpdateQueue::new();
        queue.enqueue("abstract", "a".to_string());
        queue.enqueue("methods", "b".to_string());
        queue.enqueue("results", "c".to_string());

        let mut delivered = Vec::new();
        let sent = queue.flush(|entry| {
            if entry.section_id == "methods" {
                return Err(TransportError::NotOpen);
            }
            delivered.push(entry.section_id.clone());
            Ok(())
        });

        assert_eq!(sent, 2);
        assert_eq!(delivered, vec!["abstract".to_string(), "results".to_string()]);
        // The failed entry is gone for good.
        assert!(queue.is_empty());
    }
}
