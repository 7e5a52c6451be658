//! # pmq-notify
//!
//! POSIX named message queues with edge-triggered readiness notification,
//! driven by a single-threaded event loop.
//!
//! The kernel reports queue readiness as a level: "there are messages",
//! "there is room". Polling that level on every loop turn would either spin
//! or repeat itself, so this crate translates it into edges and tells a
//! listener exactly once per transition:
//!
//! - `"messages"` when a queue goes from empty to non-empty
//! - `"drain"` when a queue goes from full to having room
//!
//! Sends and receives never block (unless the caller overrides the open
//! flags). A full or empty queue is reported as `Ok(false)` / `Ok(None)`;
//! waiting is done by waiting for the matching notification.
//!
//! ## Architecture Overview
//!
//! - `queue`: the queue handle, its attribute cache and the platform shim
//! - `monitor`: edge detection and poller registration per open descriptor
//! - `event_loop`: the `mio` based host loop that ticks every monitor
//! - `config`: open parameters, validation and JSON loading
//! - `error`: the error taxonomy shared by all of the above
//! - `cli` / `logging` / `utils`: support for the `pmq` command-line tool
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use pmq_notify::{EventLoop, MessageQueue, OpenConfig, QueueEvent};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut event_loop = EventLoop::new()?;
//!     let mut queue = MessageQueue::new(&event_loop);
//!     queue.set_listener(|event: QueueEvent| println!("queue event: {}", event))?;
//!
//!     let config = OpenConfig::new("/jobs")
//!         .create_with_mode(0o600)
//!         .with_max_messages(4)
//!         .with_message_size_limit(256);
//!     queue.open(&config)?;
//!
//!     assert!(queue.send(b"hello", 3)?);
//!     event_loop.turn(Some(Duration::from_millis(10)))?;
//!
//!     let mut buf = vec![0u8; queue.message_size_limit()?];
//!     if let Some((len, priority)) = queue.receive_with_priority(&mut buf)? {
//!         println!("{:?} at priority {}", &buf[..len], priority);
//!     }
//!
//!     queue.close()?;
//!     queue.unlink()?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod utils;

pub use config::OpenConfig;
pub use error::{QueueError, Result};
pub use event_loop::{EventLoop, LoopHandle};
pub use monitor::{EdgeDetector, QueueEvent, QueueListener, Readiness};
pub use queue::attributes::QueueAttributes;
pub use queue::MessageQueue;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Queue capacity used when creating without an explicit limit.
    pub const MAX_MESSAGES: usize = 10;

    /// Message size limit used when creating without an explicit limit.
    pub const MESSAGE_SIZE_LIMIT: usize = 8192;

    /// Number of priority bands accepted by `send`; valid priorities are
    /// `0..PRIORITY_BANDS`.
    pub const PRIORITY_BANDS: u32 = 32;

    /// Longest single wait of `EventLoop::run` and `EventLoop::run_until`.
    pub const IDLE_TICK: Duration = Duration::from_millis(20);

    /// Poller event buffer size.
    pub const EVENT_CAPACITY: usize = 64;

    /// Permission bits used by `pmq create` when none are given.
    pub const CREATE_MODE: &str = "0644";

    /// How long `pmq watch` waits by default.
    pub const WATCH_TIMEOUT: &str = "10s";
}
