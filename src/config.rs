//! # Queue Open Configuration
//!
//! `OpenConfig` is the validated record handed to [`MessageQueue::open`].
//! It can be built in code with the `with_*` helpers, produced by the CLI, or
//! loaded from a JSON file:
//!
//! ```json
//! { "name": "/jobs", "create": true, "mode": "0640", "max_messages": 4 }
//! ```
//!
//! `mode` accepts either an integer or an octal string, matching how
//! permission bits are usually written by hand.
//!
//! [`MessageQueue::open`]: crate::queue::MessageQueue::open

use crate::error::{QueueError, Result};
use nix::mqueue::MQ_OFlag;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Longest queue name accepted by the kernel, leading slash excluded.
pub const NAME_MAX: usize = 255;

/// Parameters for opening (and optionally creating) a named queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenConfig {
    /// Queue name, e.g. `/jobs`.
    pub name: String,

    /// Create the queue if it does not exist.
    pub create: bool,

    /// Raw `O_*` bits replacing the default `O_RDWR | O_NONBLOCK`.
    pub flags: Option<i32>,

    /// Permission bits, required when `create` is set.
    #[serde(deserialize_with = "deserialize_mode")]
    pub mode: Option<u32>,

    /// Fail with `EEXIST` if the queue already exists (creation only).
    pub exclusive: bool,

    /// Capacity in messages (creation only).
    pub max_messages: usize,

    /// Largest accepted payload in bytes (creation only).
    pub message_size_limit: usize,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            create: false,
            flags: None,
            mode: None,
            exclusive: false,
            max_messages: crate::defaults::MAX_MESSAGES,
            message_size_limit: crate::defaults::MESSAGE_SIZE_LIMIT,
        }
    }
}

impl OpenConfig {
    /// Open an existing queue with the default flags.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create the queue (if missing) with the given permission bits.
    pub fn create_with_mode(mut self, mode: u32) -> Self {
        self.create = true;
        self.mode = Some(mode);
        self
    }

    /// Fail with `EEXIST` if the queue already exists.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Capacity used when the queue is created.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Payload size limit used when the queue is created.
    pub fn with_message_size_limit(mut self, message_size_limit: usize) -> Self {
        self.message_size_limit = message_size_limit;
        self
    }

    /// Replace the default open flags. `O_CREAT`/`O_EXCL` are still added
    /// from `create`/`exclusive`.
    pub fn with_flags(mut self, flags: MQ_OFlag) -> Self {
        self.flags = Some(flags.bits());
        self
    }

    /// Load a configuration record from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: OpenConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Check the record without touching the kernel.
    pub fn validate(&self) -> Result<()> {
        validate_queue_name(&self.name)?;

        if self.create {
            if self.mode.is_none() {
                return Err(QueueError::validation(
                    "'mode' is required when 'create' is set",
                ));
            }
            if self.max_messages == 0 {
                return Err(QueueError::validation("'max_messages' must be at least 1"));
            }
            if self.message_size_limit == 0 {
                return Err(QueueError::validation(
                    "'message_size_limit' must be at least 1",
                ));
            }
            if i64::try_from(self.max_messages).is_err()
                || i64::try_from(self.message_size_limit).is_err()
            {
                return Err(QueueError::validation("queue limits are out of range"));
            }
        }

        if let Some(flags) = self.flags {
            if MQ_OFlag::from_bits(flags).is_none() {
                return Err(QueueError::validation(format!(
                    "'flags' contains bits not understood by mq_open: {:#o}",
                    flags
                )));
            }
        }

        Ok(())
    }

    /// Flags passed to `mq_open`.
    pub fn effective_flags(&self) -> MQ_OFlag {
        let mut flags = match self.flags {
            Some(bits) => MQ_OFlag::from_bits_truncate(bits),
            None => MQ_OFlag::O_RDWR | MQ_OFlag::O_NONBLOCK,
        };
        if self.create {
            flags |= MQ_OFlag::O_CREAT;
            if self.exclusive {
                flags |= MQ_OFlag::O_EXCL;
            }
        }
        flags
    }
}

/// Queue names are a single slash followed by up to `NAME_MAX` bytes with
/// no further slashes.
pub fn validate_queue_name(name: &str) -> Result<()> {
    let Some(rest) = name.strip_prefix('/') else {
        return Err(QueueError::validation(format!(
            "queue name '{}' must start with '/'",
            name
        )));
    };
    if rest.is_empty() {
        return Err(QueueError::validation("queue name cannot be just '/'"));
    }
    if rest.len() > NAME_MAX {
        return Err(QueueError::validation(format!(
            "queue name is too long ({} bytes, maximum {})",
            rest.len(),
            NAME_MAX
        )));
    }
    if rest.contains('/') || rest.contains('\0') {
        return Err(QueueError::validation(format!(
            "queue name '{}' may not contain '/' or NUL after the leading slash",
            name
        )));
    }
    Ok(())
}

/// Parse permission bits written in octal, with or without a leading `0`
/// or `0o`.
pub fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    let digits = s.strip_prefix("0o").unwrap_or(s);
    if digits.is_empty() {
        return Err("mode cannot be empty".to_string());
    }
    let mode =
        u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode: {}", s))?;
    if mode > 0o7777 {
        return Err(format!("mode {:#o} is out of range", mode));
    }
    Ok(mode)
}

fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawMode {
        Bits(u32),
        Octal(String),
    }

    match Option::<RawMode>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawMode::Bits(bits)) => Ok(Some(bits)),
        Some(RawMode::Octal(text)) => parse_mode(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
