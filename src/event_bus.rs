//! Event Bus (C4): broadcasters, listeners, a broadcaster-manager that lets
//! one listener subscribe across many broadcasters, hijack listeners, and
//! documented destruction-order semantics. Generalized from LLDB's C++
//! mutex+condvar idiom in
//! `examples/original_source/source/Core/Listener.cpp` to Rust
//! `Arc<Mutex<_>>` + `Condvar`.
//!
//! Lock order (must be followed globally, matching §5): manager membership
//! lock before a listener's broadcaster-set lock, before the event queue
//! lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

pub type EventMask = u32;

#[derive(Clone, Debug)]
pub struct Event {
    pub source: BroadcasterId,
    pub mask: EventMask,
    pub payload: EventPayload,
}

/// Tagged variant, per design notes §9 ("polymorphism over event-data"
/// becomes a tagged variant, dispatched by pattern match).
#[derive(Clone, Debug)]
pub enum EventPayload {
    StateChanged { old: String, new: String },
    ModulesLoaded(Vec<String>),
    ModulesUnloaded(Vec<String>),
    SymbolsLoaded(String),
    BreakpointChanged(u64),
    WatchpointChanged(u64),
    Interrupt,
    StdoutAvailable(Vec<u8>),
    StderrAvailable(Vec<u8>),
    ProfileData(Vec<u8>),
    Stopped,
    /// A `vCont`/bare-resume packet has just been written to the transport;
    /// `TargetOrchestrator::resume` hijacks its own broadcaster to wait for
    /// this before returning, per §4.9.
    ResumePacketSent,
    Custom(String),
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct BroadcasterId(pub u64);

struct BroadcasterInner {
    id: BroadcasterId,
    listeners: Mutex<Vec<Arc<ListenerInner>>>,
}

/// A handle callers hold; emits events and is observed by any listener
/// subscribed either directly or via a `BroadcasterManager`.
#[derive(Clone)]
pub struct Broadcaster(Arc<BroadcasterInner>);

impl Broadcaster {
    pub fn new(id: BroadcasterId) -> Self {
        Broadcaster(Arc::new(BroadcasterInner {
            id,
            listeners: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> BroadcasterId {
        self.0.id
    }

    pub fn broadcast(&self, mask: EventMask, payload: EventPayload) {
        let event = Event {
            source: self.0.id,
            mask,
            payload,
        };
        let listeners = self.0.listeners.lock().unwrap();
        for l in listeners.iter() {
            l.deliver(event.clone());
        }
    }

    fn subscribe(&self, listener: Arc<ListenerInner>) {
        self.0.listeners.lock().unwrap().push(listener);
    }

    fn unsubscribe(&self, listener: &Arc<ListenerInner>) {
        self.0
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

impl Drop for BroadcasterInner {
    fn drop(&mut self) {
        // Notify listeners so they drop queued events originating from
        // this broadcaster, per §4.4 destruction-order semantics.
        let listeners = self.listeners.lock().unwrap();
        for l in listeners.iter() {
            l.drop_events_from(self.id);
        }
    }
}

struct ListenerInner {
    name: String,
    queue: Mutex<VecDeque<Event>>,
    cv: Condvar,
    subscribed_masks: Mutex<HashMap<BroadcasterId, EventMask>>,
}

impl ListenerInner {
    fn deliver(&self, event: Event) {
        let want_mask = {
            let masks = self.subscribed_masks.lock().unwrap();
            *masks.get(&event.source).unwrap_or(&0)
        };
        if event.mask & want_mask == 0 {
            return;
        }
        let mut q = self.queue.lock().unwrap();
        q.push_back(event);
        self.cv.notify_all();
    }

    fn drop_events_from(&self, source: BroadcasterId) {
        let mut q = self.queue.lock().unwrap();
        q.retain(|e| e.source != source);
    }
}

/// Consumes events. Preserves arrival order per broadcaster (all events
/// share one FIFO queue here, so global arrival order is preserved too).
pub struct Listener {
    inner: Arc<ListenerInner>,
    /// Broadcasters this listener directly subscribed to (not through a
    /// manager), kept so `Drop` can unsubscribe cleanly.
    direct: Mutex<Vec<Broadcaster>>,
    managers: Mutex<Vec<Weak<BroadcasterManagerInner>>>,
}

impl Listener {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Listener {
            inner: Arc::new(ListenerInner {
                name: name.into(),
                queue: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
                subscribed_masks: Mutex::new(HashMap::new()),
            }),
            direct: Mutex::new(Vec::new()),
            managers: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the mask actually acquired (always the full requested mask
    /// here; no event bits are reserved by other subsystems in this core).
    pub fn start_listening(&self, broadcaster: &Broadcaster, mask: EventMask) -> EventMask {
        broadcaster.subscribe(self.inner.clone());
        self.inner
            .subscribed_masks
            .lock()
            .unwrap()
            .insert(broadcaster.id(), mask);
        self.direct.lock().unwrap().push(broadcaster.clone());
        mask
    }

    pub fn stop_listening(&self, broadcaster: &Broadcaster) {
        broadcaster.unsubscribe(&self.inner);
        self.inner
            .subscribed_masks
            .lock()
            .unwrap()
            .remove(&broadcaster.id());
        self.direct
            .lock()
            .unwrap()
            .retain(|b| b.id() != broadcaster.id());
    }

    pub fn next_event(&self, timeout: Duration) -> Option<Event> {
        let q = self.inner.queue.lock().unwrap();
        let (mut q, _) = self
            .inner
            .cv
            .wait_timeout_while(q, timeout, |q| q.is_empty())
            .unwrap();
        q.pop_front()
    }

    pub fn peek_event(&self) -> Option<Event> {
        self.inner.queue.lock().unwrap().front().cloned()
    }

    /// Matches events by source and type mask without consuming others.
    pub fn find_next_event_by_mask(&self, source: Option<BroadcasterId>, mask: EventMask) -> Option<Event> {
        let mut q = self.inner.queue.lock().unwrap();
        let idx = q.iter().position(|e| {
            e.mask & mask != 0 && source.map(|s| s == e.source).unwrap_or(true)
        })?;
        q.remove(idx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        for b in self.direct.lock().unwrap().drain(..) {
            b.unsubscribe(&self.inner);
        }
        for m in self.managers.lock().unwrap().drain(..) {
            if let Some(m) = m.upgrade() {
                m.remove_listener(&self.inner);
            }
        }
    }
}

struct BroadcasterManagerInner {
    /// source broadcaster id -> (listener, mask) subscriptions.
    subscriptions: Mutex<HashMap<BroadcasterId, Vec<(Arc<ListenerInner>, EventMask)>>>,
    broadcasters: Mutex<HashMap<BroadcasterId, Broadcaster>>,
}

impl BroadcasterManagerInner {
    fn remove_listener(&self, listener: &Arc<ListenerInner>) {
        let mut subs = self.subscriptions.lock().unwrap();
        for list in subs.values_mut() {
            list.retain(|(l, _)| !Arc::ptr_eq(l, listener));
        }
    }
}

/// Subscription registry letting a single listener subscribe to an
/// event-kind spec matched across many broadcasters, per §4.4.
#[derive(Clone)]
pub struct BroadcasterManager(Arc<BroadcasterManagerInner>);

impl BroadcasterManager {
    pub fn new() -> Self {
        BroadcasterManager(Arc::new(BroadcasterManagerInner {
            subscriptions: Mutex::new(HashMap::new()),
            broadcasters: Mutex::new(HashMap::new()),
        }))
    }

    pub fn register_broadcaster(&self, broadcaster: Broadcaster) {
        self.0
            .broadcasters
            .lock()
            .unwrap()
            .insert(broadcaster.id(), broadcaster);
    }

    /// Subscribe `listener` to `mask` on every broadcaster this manager
    /// knows about whose id matches `source` (or all, if `None`).
    /// Lock order: manager membership lock acquired here, then — inside
    /// `Listener::start_listening` — the broadcaster's own listener-set
    /// lock. Never the reverse.
    pub fn subscribe(&self, listener: &Arc<Listener>, source: Option<BroadcasterId>, mask: EventMask) {
        let mut subs = self.0.subscriptions.lock().unwrap();
        let broadcasters = self.0.broadcasters.lock().unwrap();
        for (id, b) in broadcasters.iter() {
            if source.map(|s| s == *id).unwrap_or(true) {
                listener.start_listening(b, mask);
                subs.entry(*id)
                    .or_default()
                    .push((listener.inner.clone(), mask));
            }
        }
        listener
            .managers
            .lock()
            .unwrap()
            .push(Arc::downgrade(&self.0));
    }
}

impl Default for BroadcasterManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Temporary listener that captures events from a broadcaster in place of
/// the normal listener, used to serialize stop-after-launch observation
/// (§4.4 "hijack"). Un-hijacking restores the original subscription.
pub struct HijackGuard {
    broadcaster: Broadcaster,
    original: Option<Arc<Listener>>,
    hijack: Arc<Listener>,
    mask: EventMask,
}

impl HijackGuard {
    pub fn install(
        broadcaster: Broadcaster,
        mask: EventMask,
        original: Option<Arc<Listener>>,
    ) -> (Self, Arc<Listener>) {
        if let Some(orig) = &original {
            orig.stop_listening(&broadcaster);
        }
        let hijack = Listener::new(format!("hijack-of-{}", broadcaster.id().0));
        hijack.start_listening(&broadcaster, mask);
        (
            HijackGuard {
                broadcaster: broadcaster.clone(),
                original,
                hijack: hijack.clone(),
                mask,
            },
            hijack,
        )
    }
}

impl Drop for HijackGuard {
    fn drop(&mut self) {
        self.hijack.stop_listening(&self.broadcaster);
        if let Some(orig) = &self.original {
            orig.start_listening(&self.broadcaster, self.mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_receives_matching_mask_only() {
        let b = Broadcaster::new(BroadcasterId(1));
        let l = Listener::new("test");
        l.start_listening(&b, 0b0011);
        b.broadcast(0b0100, EventPayload::Interrupt);
        b.broadcast(0b0001, EventPayload::Stopped);
        let e = l.next_event(Duration::from_millis(10)).unwrap();
        assert!(matches!(e.payload, EventPayload::Stopped));
        assert!(l.next_event(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn manager_multiplexes_across_broadcasters() {
        let mgr = BroadcasterManager::new();
        let b1 = Broadcaster::new(BroadcasterId(1));
        let b2 = Broadcaster::new(BroadcasterId(2));
        mgr.register_broadcaster(b1.clone());
        mgr.register_broadcaster(b2.clone());
        let l = Listener::new("multi");
        mgr.subscribe(&l, None, 0xffff_ffff);
        b1.broadcast(1, EventPayload::Custom("from-1".into()));
        b2.broadcast(1, EventPayload::Custom("from-2".into()));
        let mut sources = vec![
            l.next_event(Duration::from_millis(10)).unwrap().source,
            l.next_event(Duration::from_millis(10)).unwrap().source,
        ];
        sources.sort_by_key(|s| s.0);
        assert_eq!(sources, vec![BroadcasterId(1), BroadcasterId(2)]);
    }

    #[test]
    fn dropping_broadcaster_clears_its_queued_events() {
        let l = Listener::new("watcher");
        {
            let b = Broadcaster::new(BroadcasterId(9));
            l.start_listening(&b, 1);
            b.broadcast(1, EventPayload::Interrupt);
            assert!(l.peek_event().is_some());
            // b drops at end of this scope.
        }
        assert!(l.peek_event().is_none());
    }

    #[test]
    fn hijack_guard_restores_original_listener_on_drop() {
        let b = Broadcaster::new(BroadcasterId(5));
        let original = Listener::new("public");
        original.start_listening(&b, 1);
        {
            let (_guard, hijack) = HijackGuard::install(b.clone(), 1, Some(original.clone()));
            b.broadcast(1, EventPayload::Stopped);
            assert!(hijack.next_event(Duration::from_millis(10)).is_some());
            assert!(original.peek_event().is_none());
        }
        b.broadcast(1, EventPayload::Stopped);
        assert!(original.next_event(Duration::from_millis(10)).is_some());
    }
}
