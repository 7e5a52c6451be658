#![allow(dead_code)]

use pmq_notify::utils::{mqueue_available, unique_queue_name, MQUEUE_MOUNT};
use pmq_notify::{EventLoop, MessageQueue, OpenConfig, QueueEvent};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Unlinks its queue name when dropped so failed assertions do not leak
/// queues into the namespace.
pub struct QueueGuard {
    pub name: String,
}

impl QueueGuard {
    pub fn new(prefix: &str) -> Self {
        Self {
            name: unique_queue_name(prefix),
        }
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        let _ = MessageQueue::unlink_by_name(&self.name);
    }
}

/// PMQ needs the mqueue filesystem, kernel support and a non-zero
/// RLIMIT_MSGQUEUE, which some containers lack. Check the mount first, then
/// try creating a tiny queue.
pub fn mqueue_supported() -> bool {
    if !mqueue_available() {
        eprintln!("Skipping PMQ test: {} is not mounted or not writable", MQUEUE_MOUNT);
        return false;
    }
    let guard = QueueGuard::new("pmq_probe");
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("Skipping PMQ test: event loop unavailable: {}", e);
            return false;
        }
    };
    let mut queue = MessageQueue::new(&event_loop);
    match queue.open(&create_config(&guard.name, 1, 16)) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Skipping PMQ test: cannot create queues here: {}", e);
            false
        }
    }
}

pub fn create_config(name: &str, max_messages: usize, message_size_limit: usize) -> OpenConfig {
    OpenConfig::new(name)
        .create_with_mode(0o600)
        .with_max_messages(max_messages)
        .with_message_size_limit(message_size_limit)
}

pub type EventLog = Rc<RefCell<Vec<QueueEvent>>>;

/// A listener that appends every event to the returned log.
pub fn recorder() -> (EventLog, impl Fn(QueueEvent) + 'static) {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    (log, move |event: QueueEvent| sink.borrow_mut().push(event))
}

/// Run a few short loop turns so readiness changes get observed.
pub fn settle(event_loop: &mut EventLoop, turns: usize) {
    for _ in 0..turns {
        event_loop
            .turn(Some(Duration::from_millis(5)))
            .expect("event loop turn");
    }
}
