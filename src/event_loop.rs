//! # Single-Threaded Host Loop
//!
//! A minimal `mio` based event loop playing the role of the host's polling
//! primitive. One [`EventLoop::turn`] is one scheduling pass:
//!
//! 1. wait for poller readiness (bounded by the caller's timeout)
//! 2. tick every armed readiness monitor exactly once, in token order
//! 3. release registrations whose queues were closed before or during this
//!    pass
//!
//! Queue handles reach the loop through a cloned [`LoopHandle`]. Everything
//! here is `Rc`/`RefCell` based and stays on one thread.

use crate::error::Result;
use crate::monitor::{Readiness, Registration};
use mio::{Events, Poll, Registry, Token};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub(crate) struct LoopShared {
    registry: Registry,
    registrations: RefCell<BTreeMap<Token, Rc<Registration>>>,
    teardown: RefCell<Vec<Rc<Registration>>>,
    next_token: Cell<usize>,
}

/// Cheap handle queues use to register with an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Rc<LoopShared>,
}

impl LoopHandle {
    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub(crate) fn next_token(&self) -> Token {
        let token = self.shared.next_token.get();
        self.shared.next_token.set(token + 1);
        Token(token)
    }

    pub(crate) fn insert(&self, registration: Rc<Registration>) {
        self.shared
            .registrations
            .borrow_mut()
            .insert(registration.token(), registration);
    }

    /// Queue a disarmed registration for release at the end of a turn.
    pub(crate) fn schedule_teardown(&self, registration: Rc<Registration>) {
        self.shared.teardown.borrow_mut().push(registration);
    }
}

/// The host loop. Not `Send`; drive it from the thread that owns the queues.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    shared: Rc<LoopShared>,
    idle_tick: Duration,
}

impl EventLoop {
    /// Create a loop with its own poller and the default idle tick.
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll,
            events: Events::with_capacity(crate::defaults::EVENT_CAPACITY),
            shared: Rc::new(LoopShared {
                registry,
                registrations: RefCell::new(BTreeMap::new()),
                teardown: RefCell::new(Vec::new()),
                next_token: Cell::new(0),
            }),
            idle_tick: crate::defaults::IDLE_TICK,
        })
    }

    /// Upper bound on how long [`run_until`](Self::run_until) lets a single
    /// turn wait. Conditions the poller is not asked about are only
    /// re-checked when a turn ends, so this is also the worst-case latency
    /// for noticing that a queue drained or filled behind our back.
    pub fn with_idle_tick(mut self, idle_tick: Duration) -> Self {
        self.idle_tick = idle_tick;
        self
    }

    /// Handle for binding queues to this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Number of armed registrations, i.e. open queues on this loop.
    pub fn live_registrations(&self) -> usize {
        self.shared
            .registrations
            .borrow()
            .values()
            .filter(|registration| registration.is_armed())
            .count()
    }

    /// Closed registrations still waiting for release.
    pub fn pending_teardowns(&self) -> usize {
        self.shared.teardown.borrow().len()
    }

    /// Run one scheduling pass. Returns how many monitors were ticked.
    ///
    /// A monitor whose poller registration fails is disarmed and released;
    /// the remaining monitors are still ticked and the first such failure is
    /// returned once the pass is complete.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => self.events.clear(),
            Err(e) => return Err(e.into()),
        }

        let mut ready: BTreeMap<Token, Readiness> = BTreeMap::new();
        for event in self.events.iter() {
            let levels = ready.entry(event.token()).or_insert(Readiness::empty());
            if event.is_readable() {
                *levels |= Readiness::READABLE;
            }
            if event.is_writable() {
                *levels |= Readiness::WRITABLE;
            }
        }

        // Snapshot so listeners may open or close queues mid-pass.
        let armed: Vec<Rc<Registration>> = self
            .shared
            .registrations
            .borrow()
            .values()
            .filter(|registration| registration.is_armed())
            .cloned()
            .collect();

        let mut ticked = 0;
        let mut first_error = None;
        for registration in armed {
            let polled = ready
                .get(&registration.token())
                .copied()
                .unwrap_or(Readiness::empty());
            ticked += 1;
            if let Err(e) = registration.tick(&self.shared.registry, polled) {
                // A monitor that cannot be re-armed would fail every later
                // turn; drop it and keep serving the others.
                warn!(
                    "Readiness monitor {:?} failed, disarming it: {}",
                    registration.token(),
                    e
                );
                registration.disarm(&self.shared.registry);
                self.shared.teardown.borrow_mut().push(registration);
                first_error.get_or_insert(e);
            }
        }
        trace!("Turn complete: {} ready tokens, {} monitors ticked", ready.len(), ticked);

        self.complete_teardowns();
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(ticked),
        }
    }

    /// Turn until `done` returns true or `timeout` elapses. Returns whether
    /// `done` was satisfied.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.turn(Some(self.idle_tick.min(deadline - now)))?;
        }
    }

    /// Turn until no queue is open on this loop.
    pub fn run(&mut self) -> Result<()> {
        while self.live_registrations() > 0 {
            self.turn(Some(self.idle_tick))?;
        }
        self.complete_teardowns();
        Ok(())
    }

    fn complete_teardowns(&self) {
        let finished: Vec<Rc<Registration>> = self.shared.teardown.borrow_mut().drain(..).collect();
        let mut registrations = self.shared.registrations.borrow_mut();
        for registration in finished {
            let token = registration.token();
            // Only drop the entry if it is still this exact registration.
            if registrations
                .get(&token)
                .is_some_and(|current| Rc::ptr_eq(current, &registration))
            {
                registrations.remove(&token);
            }
            debug!("Released registration {:?}", token);
        }
    }
}
