use nix::mqueue::MqAttr;
use serde::{Deserialize, Serialize};

/// Snapshot of a queue's kernel attributes.
///
/// The two limits are fixed when the queue is created. `current_messages`
/// is a live counter and is only as fresh as the last refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    pub message_size_limit: usize,
    pub max_messages: usize,
    pub current_messages: usize,
}

impl QueueAttributes {
    /// No room for another message.
    pub fn is_full(&self) -> bool {
        self.current_messages == self.max_messages
    }

    /// Nothing queued.
    pub fn is_empty(&self) -> bool {
        self.current_messages == 0
    }

    /// Attribute record passed to `mq_open` when creating a queue.
    pub(crate) fn creation_attr(max_messages: usize, message_size_limit: usize) -> MqAttr {
        MqAttr::new(0, max_messages as i64, message_size_limit as i64, 0)
    }
}

impl From<&MqAttr> for QueueAttributes {
    fn from(attr: &MqAttr) -> Self {
        // The kernel never reports negative values here.
        Self {
            message_size_limit: attr.msgsize().max(0) as usize,
            max_messages: attr.maxmsg().max(0) as usize,
            current_messages: attr.curmsgs().max(0) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mq_attr() {
        let attr = MqAttr::new(0, 4, 128, 3);
        let attrs = QueueAttributes::from(&attr);
        assert_eq!(attrs.max_messages, 4);
        assert_eq!(attrs.message_size_limit, 128);
        assert_eq!(attrs.current_messages, 3);
        assert!(!attrs.is_full());
        assert!(!attrs.is_empty());
    }

    #[test]
    fn test_full_and_empty() {
        let full = QueueAttributes {
            message_size_limit: 16,
            max_messages: 2,
            current_messages: 2,
        };
        assert!(full.is_full());

        let empty = QueueAttributes {
            current_messages: 0,
            ..full
        };
        assert!(empty.is_empty());
        assert!(!empty.is_full());
    }
}
