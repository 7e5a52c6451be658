//! Descriptor plumbing that depends on how the C library represents `mqd_t`.
//!
//! On Linux a queue descriptor *is* a file descriptor, so it can be handed
//! straight to epoll and rebuilt from its raw value. Everything that relies
//! on that lives here and nowhere else.

use super::attributes::QueueAttributes;
use nix::mqueue::{mq_getattr, MqdT};
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// Raw pollable handle backing a queue descriptor.
pub(crate) fn pollable_fd(mqd: &MqdT) -> RawFd {
    mqd.as_raw_fd()
}

/// Run `f` against a descriptor rebuilt from `fd` without taking ownership
/// of it. The caller must guarantee `fd` is an open queue descriptor.
pub(crate) fn with_borrowed<T>(fd: RawFd, f: impl FnOnce(&MqdT) -> T) -> T {
    let mqd = ManuallyDrop::new(unsafe { MqdT::from_raw_fd(fd) });
    f(&mqd)
}

/// Current attributes of the queue behind `fd`.
pub(crate) fn sample_attributes(fd: RawFd) -> nix::Result<QueueAttributes> {
    with_borrowed(fd, |mqd| mq_getattr(mqd).map(|attr| QueueAttributes::from(&attr)))
}
