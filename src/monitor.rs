//! # Readiness Monitor
//!
//! Turns the level-triggered readiness the poller reports on every loop turn
//! into edge-triggered `"messages"` / `"drain"` notifications.
//!
//! ## Edge Protocol
//!
//! Each condition (readable, writable) carries a "notified" bit. On every
//! tick, with `levels` being the conditions that are true right now:
//!
//! - true and not yet notified: mark notified, stop asking the poller about
//!   it, emit the event once
//! - false: clear the notified bit and ask the poller about it again
//! - true and already notified: nothing
//!
//! A condition the poller is not currently asked about is sampled from the
//! kernel's message counter instead of being treated as false, so a
//! condition that persists is never announced twice.
//!
//! ## Registrations
//!
//! Every `open` arms a fresh registration under a new token. Closing
//! disarms it synchronously and hands it to the loop, which releases it at
//! the end of a later turn. Tokens are never reused, so a release that is
//! still pending cannot touch a registration armed after it.

use crate::event_loop::LoopHandle;
use crate::queue::attributes::QueueAttributes;
use crate::queue::platform;
use bitflags::bitflags;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::cell::RefCell;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use tracing::{debug, trace, warn};

bitflags! {
    /// Readiness conditions of a queue descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

impl Readiness {
    /// Conditions implied by a message count.
    pub fn from_attributes(attrs: &QueueAttributes) -> Self {
        let mut levels = Readiness::empty();
        if attrs.current_messages > 0 {
            levels |= Readiness::READABLE;
        }
        if attrs.current_messages < attrs.max_messages {
            levels |= Readiness::WRITABLE;
        }
        levels
    }

    fn to_interest(self) -> Option<Interest> {
        match (self.contains(Self::READABLE), self.contains(Self::WRITABLE)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// Notification delivered to a [`QueueListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The queue went from empty to non-empty.
    Messages,
    /// The queue went from full to non-full.
    Drain,
}

impl QueueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEvent::Messages => "messages",
            QueueEvent::Drain => "drain",
        }
    }
}

impl fmt::Display for QueueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of edge-triggered queue notifications.
///
/// Called from [`EventLoop::turn`](crate::event_loop::EventLoop::turn) with
/// no internal borrows held, so it may send, receive or close.
pub trait QueueListener {
    fn on_event(&self, event: QueueEvent);
}

impl<F> QueueListener for F
where
    F: Fn(QueueEvent),
{
    fn on_event(&self, event: QueueEvent) {
        self(event)
    }
}

/// Two-bit edge state plus the set of conditions the poller is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeDetector {
    notified_readable: bool,
    notified_writable: bool,
    interest: Readiness,
}

impl EdgeDetector {
    /// Initial state for a freshly opened descriptor.
    ///
    /// Readable starts marked when the queue is empty and writable when it
    /// is full; both are watched. A queue that already holds messages
    /// therefore announces `"messages"` on the first tick, and a queue with
    /// room announces `"drain"`.
    pub fn new(attrs: &QueueAttributes) -> Self {
        Self {
            notified_readable: attrs.current_messages == 0,
            notified_writable: attrs.current_messages >= attrs.max_messages,
            interest: Readiness::all(),
        }
    }

    pub fn interest(&self) -> Readiness {
        self.interest
    }

    pub fn notified_readable(&self) -> bool {
        self.notified_readable
    }

    pub fn notified_writable(&self) -> bool {
        self.notified_writable
    }

    /// Feed one tick of level state; returns the events to emit, readable
    /// first.
    pub fn observe(&mut self, levels: Readiness) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        if Self::step(
            &mut self.notified_readable,
            &mut self.interest,
            Readiness::READABLE,
            levels,
        ) {
            events.push(QueueEvent::Messages);
        }
        if Self::step(
            &mut self.notified_writable,
            &mut self.interest,
            Readiness::WRITABLE,
            levels,
        ) {
            events.push(QueueEvent::Drain);
        }
        events
    }

    fn step(
        notified: &mut bool,
        interest: &mut Readiness,
        condition: Readiness,
        levels: Readiness,
    ) -> bool {
        if !levels.contains(condition) {
            *notified = false;
            interest.insert(condition);
            return false;
        }
        // Ready: stop polling for it until it lapses.
        interest.remove(condition);
        if *notified {
            return false;
        }
        *notified = true;
        true
    }
}

struct RegistrationState {
    edges: EdgeDetector,
    armed: bool,
    polled: bool,
}

/// One poller registration of one open descriptor.
pub(crate) struct Registration {
    token: Token,
    fd: RawFd,
    listener: Option<Rc<dyn QueueListener>>,
    state: RefCell<RegistrationState>,
}

impl Registration {
    pub(crate) fn new(
        token: Token,
        fd: RawFd,
        attrs: &QueueAttributes,
        listener: Option<Rc<dyn QueueListener>>,
    ) -> Self {
        Self {
            token,
            fd,
            listener,
            state: RefCell::new(RegistrationState {
                edges: EdgeDetector::new(attrs),
                armed: true,
                polled: false,
            }),
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.state.borrow().armed
    }

    /// One host poll tick. `polled` is what the poller reported for this
    /// token during the current turn.
    pub(crate) fn tick(&self, registry: &Registry, polled: Readiness) -> std::io::Result<()> {
        let events = {
            let mut state = self.state.borrow_mut();
            if !state.armed {
                return Ok(());
            }
            let interest = state.edges.interest();
            let mut levels = polled & interest;
            let unwatched = interest.complement();
            if !unwatched.is_empty() {
                match platform::sample_attributes(self.fd) {
                    Ok(attrs) => levels |= Readiness::from_attributes(&attrs) & unwatched,
                    Err(e) => {
                        // Unknown: keep the last observed state.
                        warn!("Failed to sample queue attributes for {:?}: {}", self.token, e);
                        levels |= unwatched;
                    }
                }
            }
            trace!(
                "Tick {:?}: polled={:?} levels={:?} interest={:?}",
                self.token,
                polled,
                levels,
                interest
            );
            state.edges.observe(levels)
        };

        for event in events {
            // The listener may have closed the queue on the previous event.
            if !self.is_armed() {
                return Ok(());
            }
            debug!("Emitting '{}' for {:?}", event, self.token);
            if let Some(listener) = &self.listener {
                listener.on_event(event);
            }
        }

        let mut state = self.state.borrow_mut();
        if state.armed {
            self.rearm(registry, &mut state)?;
        }
        Ok(())
    }

    fn rearm(&self, registry: &Registry, state: &mut RegistrationState) -> std::io::Result<()> {
        match (state.edges.interest().to_interest(), state.polled) {
            (Some(interest), true) => {
                registry.reregister(&mut SourceFd(&self.fd), self.token, interest)
            }
            (Some(interest), false) => {
                registry.register(&mut SourceFd(&self.fd), self.token, interest)?;
                state.polled = true;
                Ok(())
            }
            (None, true) => {
                registry.deregister(&mut SourceFd(&self.fd))?;
                state.polled = false;
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }

    /// Stop ticking and remove the fd from the poller. Deregistration
    /// failures are logged, the registration stays disarmed either way.
    pub(crate) fn disarm(&self, registry: &Registry) {
        let mut state = self.state.borrow_mut();
        state.armed = false;
        if state.polled {
            if let Err(e) = registry.deregister(&mut SourceFd(&self.fd)) {
                warn!("Failed to deregister {:?} from the poller: {}", self.token, e);
            }
            state.polled = false;
        }
    }
}

/// A queue handle's live registration with the event loop.
pub struct ReadinessMonitor {
    registration: Rc<Registration>,
    handle: LoopHandle,
}

impl ReadinessMonitor {
    /// Register `fd` with the loop and start watching both conditions.
    pub(crate) fn arm(
        handle: &LoopHandle,
        fd: RawFd,
        attrs: &QueueAttributes,
        listener: Option<Rc<dyn QueueListener>>,
    ) -> crate::error::Result<Self> {
        let token = handle.next_token();
        let registration = Rc::new(Registration::new(token, fd, attrs, listener));
        {
            let mut state = registration.state.borrow_mut();
            registration.rearm(handle.registry(), &mut state)?;
        }
        handle.insert(Rc::clone(&registration));
        debug!("Armed readiness monitor {:?} on fd {}", token, fd);
        Ok(Self {
            registration,
            handle: handle.clone(),
        })
    }

    /// Stop watching immediately and schedule release of the registration.
    /// Must run while the descriptor is still open.
    pub(crate) fn disarm(self) {
        self.registration.disarm(self.handle.registry());
        debug!("Disarmed readiness monitor {:?}", self.registration.token);
        self.handle.schedule_teardown(self.registration);
    }

    /// Snapshot of the current edge state.
    pub fn edges(&self) -> EdgeDetector {
        self.registration.state.borrow().edges
    }
}
