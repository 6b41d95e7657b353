//! Handler registry for delivered packets.
//!
//! A [`Dispatcher`] maps [`HandlerKey`]s to callback lists and holds a list
//! of attached child dispatchers.  Dispatch order for one packet:
//!
//! ```text
//!   Packet(kind) handlers ──▶ Message(kind, id) handlers ──▶ child 0 ──▶ child 1 ...
//!                                                           (same order, recursively)
//! ```
//!
//! The transport uses one root dispatcher per connection and invokes it from
//! the coordinator task only, so callbacks never run concurrently with each
//! other.  Application layers typically keep their own dispatcher and attach
//! it as a child of the root.
//!
//! `Dispatcher` is a cheap `Clone` handle; clones share one registry.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::message::Message;
use crate::packet::{Packet, PacketType};

/// What a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Every packet of a kind.
    Packet(PacketType),
    /// ACTION/EVENT packets whose first payload byte is the given id.
    Message(PacketType, u8),
}

impl HandlerKey {
    /// Key matching the typed record `M`.
    pub fn of<M: Message>() -> Self {
        match M::ID {
            Some(id) => HandlerKey::Message(M::PACKET_TYPE, id),
            None => HandlerKey::Packet(M::PACKET_TYPE),
        }
    }
}

/// Misuse of the registry tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The child already reaches this dispatcher (or is this dispatcher).
    #[error("attaching this dispatcher would create a cycle")]
    Cycle,
}

/// Identifies one registration, for [`Dispatcher::del_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler = Arc<dyn Fn(&Packet) + Send + Sync>;

struct Entry {
    id: HandlerId,
    handler: Handler,
    one_shot: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<HandlerKey, Vec<Entry>>,
    children: Vec<Dispatcher>,
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.lock();
        f.debug_struct("Dispatcher")
            .field("keys", &reg.handlers.len())
            .field("children", &reg.children.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` for `key`.  One-shot handlers are removed the first
    /// time they match.
    pub fn add_handler<F>(&self, key: HandlerKey, handler: F, one_shot: bool) -> HandlerId
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let mut reg = self.lock();
        reg.next_id += 1;
        let id = HandlerId(reg.next_id);
        reg.handlers.entry(key).or_default().push(Entry {
            id,
            handler: Arc::new(handler),
            one_shot,
        });
        id
    }

    /// Remove one registration.  Returns `false` if it was not present.
    pub fn del_handler(&self, key: HandlerKey, id: HandlerId) -> bool {
        let mut reg = self.lock();
        let Some(list) = reg.handlers.get_mut(&key) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            reg.handlers.remove(&key);
        }
        removed
    }

    /// Attach `child`; it sees every packet after this dispatcher's own
    /// handlers.  Refused if `child` is this dispatcher or can already reach
    /// it through its own children.
    pub fn add_child(&self, child: &Dispatcher) -> Result<(), DispatchError> {
        if child.reaches(self) {
            log::warn!("[conn] refusing to attach a dispatcher that would form a cycle");
            return Err(DispatchError::Cycle);
        }
        self.lock().children.push(child.clone());
        Ok(())
    }

    /// Whether `target` is this dispatcher or one of its descendants.
    fn reaches(&self, target: &Dispatcher) -> bool {
        let mut seen: Vec<Dispatcher> = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(d) = stack.pop() {
            if Arc::ptr_eq(&d.inner, &target.inner) {
                return true;
            }
            if seen.iter().any(|s| Arc::ptr_eq(&s.inner, &d.inner)) {
                continue;
            }
            stack.extend(d.lock().children.iter().cloned());
            seen.push(d);
        }
        false
    }

    /// Detach `child`.  Returns `false` if it was not attached.
    pub fn remove_child(&self, child: &Dispatcher) -> bool {
        let mut reg = self.lock();
        let before = reg.children.len();
        reg.children.retain(|c| !Arc::ptr_eq(&c.inner, &child.inner));
        reg.children.len() != before
    }

    /// Register a one-shot handler that forwards the matching packet into a
    /// channel.
    pub fn once(&self, key: HandlerKey) -> (HandlerId, oneshot::Receiver<Packet>) {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.add_handler(
            key,
            move |pkt| {
                let slot = tx.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(tx) = slot {
                    let _ = tx.send(pkt.clone());
                }
            },
            true,
        );
        (id, rx)
    }

    /// Invoke every matching handler, then every child.
    pub fn dispatch(&self, packet: &Packet) {
        let mut keys = vec![HandlerKey::Packet(packet.packet_type())];
        if let Some(id) = packet.message_id() {
            keys.push(HandlerKey::Message(packet.packet_type(), id));
        }
        for key in keys {
            for handler in self.take_matching(key) {
                invoke(&handler, packet);
            }
        }
        let children = self.lock().children.clone();
        for child in children {
            child.dispatch(packet);
        }
    }

    /// Snapshot the handlers for `key`, dropping one-shots from the registry.
    fn take_matching(&self, key: HandlerKey) -> Vec<Handler> {
        let mut reg = self.lock();
        let Some(list) = reg.handlers.get_mut(&key) else {
            return Vec::new();
        };
        let snapshot: Vec<Handler> = list.iter().map(|e| Arc::clone(&e.handler)).collect();
        list.retain(|e| !e.one_shot);
        if list.is_empty() {
            reg.handlers.remove(&key);
        }
        snapshot
    }

    /// Drop every handler registration.  Children stay attached.
    ///
    /// Pending [`Dispatcher::once`] receivers resolve with an error.
    pub fn clear_handlers(&self) {
        self.lock().handlers.clear();
    }

    /// Number of registrations for `key`.
    pub fn handler_count(&self, key: HandlerKey) -> usize {
        self.lock().handlers.get(&key).map_or(0, Vec::len)
    }
}

fn invoke(handler: &Handler, packet: &Packet) {
    if catch_unwind(AssertUnwindSafe(|| handler(packet))).is_err() {
        log::warn!("[conn] handler for {} packet panicked", packet.packet_type());
    }
}
