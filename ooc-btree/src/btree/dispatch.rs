//! Dispatch loop: admits requests under range locks and runs their state
//! machines on one dedicated thread.
//!
//! # Design
//!
//! - Messages arrive on one queue: new requests, resumptions posted by read
//!   completions, and shutdown
//! - A new request is deferred until its lock conflicts neither with a held
//!   lock nor with a request still deferred ahead of it, and until fewer
//!   than `max_active` requests are in progress
//! - A suspended request keeps its lock and the pins of its last step until
//!   its read completes; the pins are handed back to the engine when it runs
//!   again
//!
//! # Invariants
//!
//! - Every admitted request holds exactly one lock until it completes
//! - A request id is in at most one of `deferred` and `suspended`

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::btree::cache::{RequestId, Resident};
use crate::btree::codec::{Key, Value};
use crate::btree::engine::Engine;
use crate::btree::lock::{LockMode, LockTable, RangeLock};
use crate::btree::machine::Machine;

/// Input of the dispatch loop.
pub enum Message<K: Key, V: Value> {
    Submit(RequestId, Machine<K, V>),
    Resume(RequestId),
    /// Finish every submitted request, then exit.
    Shutdown,
}

struct Request<K: Key, V: Value> {
    id: RequestId,
    machine: Machine<K, V>,
    lock: RangeLock<K>,
}

/// Owner of the engine on the dispatch thread.
pub struct Dispatcher<K: Key, V: Value> {
    engine: Engine<K, V>,
    rx: mpsc::UnboundedReceiver<Message<K, V>>,
    locks: LockTable<K>,
    deferred: VecDeque<Request<K, V>>,
    suspended: HashMap<RequestId, (Request<K, V>, Vec<Arc<dyn Resident>>)>,
    active: usize,
    max_active: usize,
}

impl<K: Key, V: Value> Dispatcher<K, V> {
    /// # Pre-conditions
    /// - `max_active` > 0
    #[must_use]
    pub fn new(
        engine: Engine<K, V>,
        rx: mpsc::UnboundedReceiver<Message<K, V>>,
        max_active: usize,
    ) -> Self {
        assert!(max_active > 0, "at least one request must be able to run");
        Self {
            engine,
            rx,
            locks: LockTable::new(),
            deferred: VecDeque::new(),
            suspended: HashMap::new(),
            active: 0,
            max_active,
        }
    }

    /// Process messages until shutdown has been requested and every
    /// submitted request has completed.
    pub fn run(mut self) {
        info!(max_active = self.max_active, "dispatch loop started");
        let mut stopping = false;

        while let Some(message) = self.rx.blocking_recv() {
            match message {
                Message::Submit(id, machine) => {
                    trace!(id, request = machine.name(), "request submitted");
                    let lock = machine.lock();
                    self.deferred.push_back(Request { id, machine, lock });
                }
                Message::Resume(id) => {
                    if let Some((request, pins)) = self.suspended.remove(&id) {
                        trace!(id, "request resumed");
                        self.run_request(request, pins);
                    }
                }
                Message::Shutdown => stopping = true,
            }

            self.admit();
            if stopping && self.active == 0 && self.deferred.is_empty() {
                break;
            }
        }

        info!(size = self.engine.size(), "dispatch loop exited");
    }

    /// Admit and run deferred requests while capacity and locks allow.
    fn admit(&mut self) {
        while let Some(index) = self.next_admissible() {
            let Some(request) = self.deferred.remove(index) else {
                return;
            };
            self.locks.acquire(request.id, request.lock.clone());
            self.active += 1;
            if request.machine.is_mutation() {
                self.engine.bump_version();
            }
            trace!(id = request.id, request = request.machine.name(), "request admitted");
            self.run_request(request, Vec::new());
        }
    }

    /// Position of the oldest deferred request that may start now.
    fn next_admissible(&self) -> Option<usize> {
        if self.active >= self.max_active {
            return None;
        }
        for (index, request) in self.deferred.iter().enumerate() {
            let blocked = self.locks.conflicts(&request.lock)
                || self
                    .deferred
                    .iter()
                    .take(index)
                    .any(|ahead| ahead.lock.conflicts_with(&request.lock));
            if !blocked {
                return Some(index);
            }
            // Nothing behind an exclusive lock on every key can go first.
            if request.lock.mode == LockMode::Exclusive && request.lock.range.is_everything() {
                return None;
            }
        }
        None
    }

    fn run_request(&mut self, mut request: Request<K, V>, pins: Vec<Arc<dyn Resident>>) {
        let id = request.id;
        self.engine.begin_request(id);
        self.engine.adopt_pins(pins);
        match request.machine.resume(&mut self.engine) {
            Ok(()) => {
                trace!(id, request = request.machine.name(), "request completed");
                self.locks.release(id);
                self.active -= 1;
                self.engine.begin_step();
            }
            Err(suspend) => {
                trace!(id, block = suspend.block, "request suspended");
                self.suspended.insert(id, (request, suspend.pins));
            }
        }
    }
}
