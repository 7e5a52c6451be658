use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by queue handles and the event loop.
///
/// "Would block" on send or receive is deliberately absent: backpressure is
/// reported through the `Ok` value of those operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed configuration, undersized buffer, out-of-range priority and
    /// similar caller mistakes. Handle state is never mutated.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue already closed")]
    AlreadyClosed,

    #[error("Nothing to unlink")]
    NothingToUnlink,

    #[error("Queue is not open")]
    NotOpen,

    /// A kernel queue operation failed with something other than `EAGAIN`.
    #[error("{op} failed: {}", .source.desc())]
    Os {
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// `mq_open` succeeded but the descriptor could not be set up
    /// (attribute query or poller registration); it was closed again.
    #[error("Opening '{name}' failed: {source}")]
    OpenIncomplete {
        name: String,
        #[source]
        source: Box<QueueError>,
    },

    /// Poller registration failures.
    #[error("Event loop I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        QueueError::Validation(msg.into())
    }

    pub(crate) fn os(op: &'static str, source: Errno) -> Self {
        QueueError::Os { op, source }
    }

    pub(crate) fn open_incomplete(name: &str, source: QueueError) -> Self {
        QueueError::OpenIncomplete {
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    /// The underlying errno, if this error came from the kernel.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            QueueError::Os { source, .. } => Some(*source),
            QueueError::OpenIncomplete { source, .. } => source.errno(),
            _ => None,
        }
    }

    /// True for the lifecycle class: any failure of `open` past validation,
    /// double close and unlink without a known name.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            QueueError::AlreadyClosed
                | QueueError::NothingToUnlink
                | QueueError::NotOpen
                | QueueError::OpenIncomplete { .. }
                | QueueError::Os { op: "mq_open", .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
