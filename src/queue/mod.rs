//! # Queue Handle
//!
//! [`MessageQueue`] owns one POSIX queue descriptor, the name it was opened
//! under, the last attribute snapshot and the readiness monitor armed for
//! the descriptor. The descriptor and the monitor registration always come
//! and go together.
//!
//! ## Listener Capture
//!
//! A listener set with [`MessageQueue::set_listener`] is captured by the
//! first successful [`open`](MessageQueue::open) and kept for the lifetime
//! of the handle, across any number of close/reopen cycles, including reopen
//! under a different name. After capture, `set_listener` is rejected rather
//! than silently rebinding.

pub mod attributes;
pub(crate) mod platform;

use crate::config::OpenConfig;
use crate::error::{QueueError, Result};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::monitor::{EdgeDetector, QueueListener, ReadinessMonitor};
use attributes::QueueAttributes;
use nix::errno::Errno;
use nix::mqueue::{mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MqdT};
use nix::sys::stat::Mode;
use std::rc::Rc;
use tracing::{debug, warn};

/// Handle on a named POSIX message queue with edge-triggered notification.
pub struct MessageQueue {
    handle: LoopHandle,
    descriptor: Option<MqdT>,
    monitor: Option<ReadinessMonitor>,
    name: Option<String>,
    attrs: QueueAttributes,
    pending_listener: Option<Rc<dyn QueueListener>>,
    listener: Option<Rc<dyn QueueListener>>,
    listener_captured: bool,
}

impl MessageQueue {
    /// A closed handle bound to `event_loop`.
    pub fn new(event_loop: &EventLoop) -> Self {
        Self::with_handle(event_loop.handle())
    }

    /// A closed handle bound to the loop behind `handle`.
    pub fn with_handle(handle: LoopHandle) -> Self {
        Self {
            handle,
            descriptor: None,
            monitor: None,
            name: None,
            attrs: QueueAttributes::default(),
            pending_listener: None,
            listener: None,
            listener_captured: false,
        }
    }

    /// Set the listener the next successful open will capture.
    ///
    /// Fails once a listener has been captured.
    pub fn set_listener<L>(&mut self, listener: L) -> Result<()>
    where
        L: QueueListener + 'static,
    {
        if self.listener_captured {
            return Err(QueueError::validation(
                "listener is captured by the first successful open and cannot be replaced",
            ));
        }
        self.pending_listener = Some(Rc::new(listener));
        Ok(())
    }

    /// Whether an open has already captured the listener.
    pub fn listener_captured(&self) -> bool {
        self.listener_captured
    }

    /// Open (and optionally create) a queue, closing any descriptor this
    /// handle already holds. On failure the handle is left closed.
    pub fn open(&mut self, config: &OpenConfig) -> Result<()> {
        config.validate()?;

        if self.descriptor.is_some() {
            if let Err(e) = self.close() {
                warn!("Closing previous queue before reopen failed: {}", e);
            }
        }

        let flags = config.effective_flags();
        let opened = if config.create {
            let mode = Mode::from_bits_truncate(config.mode.unwrap_or_default() as libc::mode_t);
            let attr =
                QueueAttributes::creation_attr(config.max_messages, config.message_size_limit);
            mq_open(config.name.as_str(), flags, mode, Some(&attr))
        } else {
            mq_open(config.name.as_str(), flags, Mode::empty(), None)
        };
        let mqd = opened.map_err(|e| QueueError::os("mq_open", e))?;

        let attrs = match mq_getattr(&mqd) {
            Ok(attr) => QueueAttributes::from(&attr),
            Err(e) => {
                close_after_failed_open(mqd);
                return Err(QueueError::open_incomplete(
                    &config.name,
                    QueueError::os("mq_getattr", e),
                ));
            }
        };

        let listener = if self.listener_captured {
            self.listener.clone()
        } else {
            self.pending_listener.clone()
        };
        let fd = platform::pollable_fd(&mqd);
        let monitor = match ReadinessMonitor::arm(&self.handle, fd, &attrs, listener) {
            Ok(monitor) => monitor,
            Err(e) => {
                close_after_failed_open(mqd);
                return Err(QueueError::open_incomplete(&config.name, e));
            }
        };

        if !self.listener_captured {
            self.listener = self.pending_listener.take();
            self.listener_captured = true;
        }
        self.name = Some(config.name.clone());
        self.attrs = attrs;
        self.descriptor = Some(mqd);
        self.monitor = Some(monitor);

        debug!(
            "Opened message queue '{}' (fd {}, {}/{} messages, {} byte limit)",
            config.name, fd, attrs.current_messages, attrs.max_messages, attrs.message_size_limit
        );
        Ok(())
    }

    /// Disarm notifications and close the descriptor. The name is kept so
    /// the queue can still be unlinked.
    pub fn close(&mut self) -> Result<()> {
        let mqd = self.descriptor.take().ok_or(QueueError::AlreadyClosed)?;
        if let Some(monitor) = self.monitor.take() {
            monitor.disarm();
        }
        mq_close(mqd).map_err(|e| QueueError::os("mq_close", e))?;
        debug!(
            "Closed message queue '{}'",
            self.name.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Remove the last opened name from the queue namespace, open or not.
    pub fn unlink(&mut self) -> Result<()> {
        let name = self.name.as_deref().ok_or(QueueError::NothingToUnlink)?;
        mq_unlink(name).map_err(|e| QueueError::os("mq_unlink", e))?;
        debug!("Unlinked message queue '{}'", name);
        self.name = None;
        Ok(())
    }

    /// Remove `name` from the queue namespace without opening it.
    pub fn unlink_by_name(name: &str) -> Result<()> {
        crate::config::validate_queue_name(name)?;
        mq_unlink(name).map_err(|e| QueueError::os("mq_unlink", e))?;
        debug!("Unlinked message queue '{}'", name);
        Ok(())
    }

    /// Non-blocking send. `Ok(false)` means the queue is full.
    pub fn send(&mut self, payload: &[u8], priority: u32) -> Result<bool> {
        if priority >= crate::defaults::PRIORITY_BANDS {
            return Err(QueueError::validation(format!(
                "priority must be an integer 0 <= n < {}, got {}",
                crate::defaults::PRIORITY_BANDS,
                priority
            )));
        }
        let mqd = self.descriptor.as_ref().ok_or(QueueError::NotOpen)?;
        if payload.len() > self.attrs.message_size_limit {
            return Err(QueueError::validation(format!(
                "payload of {} bytes exceeds the queue's {} byte message limit",
                payload.len(),
                self.attrs.message_size_limit
            )));
        }

        match mq_send(mqd, payload, priority) {
            Ok(()) => {}
            Err(Errno::EAGAIN) => return Ok(false),
            Err(e) => return Err(QueueError::os("mq_send", e)),
        }
        self.refresh()?;
        Ok(true)
    }

    /// Non-blocking receive into `buffer`, which must hold at least
    /// [`message_size_limit`](Self::message_size_limit) bytes. `Ok(None)`
    /// means the queue is empty.
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>> {
        Ok(self.receive_with_priority(buffer)?.map(|(len, _)| len))
    }

    /// Like [`receive`](Self::receive) but also reports the priority band.
    pub fn receive_with_priority(&mut self, buffer: &mut [u8]) -> Result<Option<(usize, u32)>> {
        let mqd = self.descriptor.as_ref().ok_or(QueueError::NotOpen)?;
        if buffer.len() < self.attrs.message_size_limit {
            return Err(QueueError::validation(format!(
                "receive buffer of {} bytes is smaller than the queue's {} byte message limit",
                buffer.len(),
                self.attrs.message_size_limit
            )));
        }

        let mut priority = 0u32;
        let len = match mq_receive(mqd, buffer, &mut priority) {
            Ok(len) => len,
            Err(Errno::EAGAIN) => return Ok(None),
            Err(e) => return Err(QueueError::os("mq_receive", e)),
        };
        self.refresh()?;
        Ok(Some((len, priority)))
    }

    /// Largest payload the queue accepts, refreshed from the kernel.
    pub fn message_size_limit(&mut self) -> Result<usize> {
        Ok(self.refresh()?.message_size_limit)
    }

    /// Queue capacity in messages, refreshed from the kernel.
    pub fn max_messages(&mut self) -> Result<usize> {
        Ok(self.refresh()?.max_messages)
    }

    /// Messages currently queued, refreshed from the kernel.
    pub fn current_messages(&mut self) -> Result<usize> {
        Ok(self.refresh()?.current_messages)
    }

    /// True when `current_messages == max_messages` after a refresh.
    pub fn is_full(&mut self) -> Result<bool> {
        Ok(self.refresh()?.is_full())
    }

    /// Freshly queried attributes.
    pub fn attributes(&mut self) -> Result<QueueAttributes> {
        self.refresh()
    }

    /// Attributes as of the last refresh, without a syscall.
    pub fn cached_attributes(&self) -> QueueAttributes {
        self.attrs
    }

    /// Name of the last opened queue, until it is unlinked.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the handle holds a descriptor.
    pub fn is_open(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Edge state of the armed monitor, if open.
    pub fn edges(&self) -> Option<EdgeDetector> {
        self.monitor.as_ref().map(ReadinessMonitor::edges)
    }

    fn refresh(&mut self) -> Result<QueueAttributes> {
        let mqd = self.descriptor.as_ref().ok_or(QueueError::NotOpen)?;
        let attr = mq_getattr(mqd).map_err(|e| QueueError::os("mq_getattr", e))?;
        self.attrs = QueueAttributes::from(&attr);
        Ok(self.attrs)
    }
}

fn close_after_failed_open(mqd: MqdT) {
    if let Err(e) = mq_close(mqd) {
        warn!("Failed to close message queue: {}", e);
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if self.descriptor.is_some() {
            debug!("Dropping open message queue handle");
            if let Err(e) = self.close() {
                warn!("Failed to close message queue on drop: {}", e);
            }
        }
    }
}
