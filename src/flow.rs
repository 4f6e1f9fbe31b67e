use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::errors::LinkError;

/// A timestamped unit of media data travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct MediaBuffer {
    pub pts: Duration,
    pub payload: Bytes,
}

/// What crosses a connection point: data, or the in-band end-of-stream
/// control signal that triggers container finalization.
#[derive(Debug, Clone)]
pub enum FlowItem {
    Data(MediaBuffer),
    EndOfStream,
}

impl FlowItem {
    pub fn is_eos(&self) -> bool {
        matches!(self, FlowItem::EndOfStream)
    }
}

type Consumer = Arc<dyn Fn(FlowItem) + Send + Sync>;
type FrozenCallback = Box<dyn FnOnce() + Send>;
type EosCallback = Box<dyn FnOnce() + Send>;

/// A named connection point on a processing element.
///
/// A point either forwards items to a linked downstream peer or hands them
/// to an installed consumer callback. Two kinds of flow interceptor can be
/// installed:
///
/// - a *freeze*, which reports quiescence exactly once (on the worker
///   thread that reaches the point) and then holds that thread until the
///   interceptor is removed; the item that triggered the report is held and
///   resumes downstream after removal, it is never dropped;
/// - a one-shot *end-of-stream watch*, which consumes an end-of-stream item
///   (it does not propagate further) and fires its callback; data items
///   pass through untouched.
///
/// Interceptor callbacks are invoked without the point's lock held, so they
/// may re-enter the graph: remove interceptors, unlink and relink points,
/// or inject new items.
pub struct FlowPoint {
    name: String,
    state: Mutex<PointState>,
    resume: Condvar,
}

#[derive(Default)]
struct PointState {
    peer: Option<Arc<FlowPoint>>,
    consumer: Option<Consumer>,
    fallback: Option<Consumer>,
    freeze: Option<Freeze>,
    eos_watch: Option<EosCallback>,
    dropped: u64,
}

struct Freeze {
    pending_notify: Option<FrozenCallback>,
}

impl std::fmt::Debug for FlowPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowPoint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FlowPoint {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(PointState::default()),
            resume: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join an upstream point to a downstream point. Fails if the upstream
    /// point already routes somewhere.
    pub fn link(upstream: &Arc<FlowPoint>, downstream: &Arc<FlowPoint>) -> Result<(), LinkError> {
        let mut state = upstream.state.lock();
        if state.peer.is_some() {
            return Err(LinkError::AlreadyLinked {
                point: upstream.name.clone(),
            });
        }
        if state.consumer.is_some() {
            return Err(LinkError::Occupied {
                point: upstream.name.clone(),
            });
        }
        state.peer = Some(Arc::clone(downstream));
        Ok(())
    }

    pub fn unlink(&self) {
        self.state.lock().peer = None;
    }

    pub fn is_linked(&self) -> bool {
        self.state.lock().peer.is_some()
    }

    /// Make this point a consuming endpoint.
    pub fn set_consumer(&self, consumer: impl Fn(FlowItem) + Send + Sync + 'static) {
        self.state.lock().consumer = Some(Arc::new(consumer));
    }

    /// Install a handler invoked only for items that would otherwise be
    /// dropped because the point routes nowhere. The assembly uses this on
    /// the hand-off junction to surface lost items and stray end-of-stream
    /// signals while no stage is attached.
    pub fn set_fallback(&self, fallback: impl Fn(FlowItem) + Send + Sync + 'static) {
        self.state.lock().fallback = Some(Arc::new(fallback));
    }

    pub fn install_freeze(&self, on_frozen: impl FnOnce() + Send + 'static) {
        self.state.lock().freeze = Some(Freeze {
            pending_notify: Some(Box::new(on_frozen)),
        });
    }

    pub fn remove_freeze(&self) {
        self.state.lock().freeze = None;
        self.resume.notify_all();
    }

    pub fn install_eos_watch(&self, on_eos: impl FnOnce() + Send + 'static) {
        self.state.lock().eos_watch = Some(Box::new(on_eos));
    }

    /// Items that arrived with no route and no fallback installed.
    pub fn dropped_items(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Deliver an item through this point. Runs on the producing worker
    /// thread and may park there while a freeze interceptor is installed.
    pub fn push(&self, item: FlowItem) {
        let mut state = self.state.lock();
        loop {
            let Some(freeze) = state.freeze.as_mut() else {
                break;
            };
            if let Some(notify) = freeze.pending_notify.take() {
                // The flow is quiescent at this point: the triggering item
                // is held here and nothing else can cross. The callback
                // re-enters the graph, so release the lock first.
                drop(state);
                notify();
                state = self.state.lock();
            } else {
                self.resume.wait(&mut state);
            }
        }
        if item.is_eos() {
            if let Some(watch) = state.eos_watch.take() {
                drop(state);
                // One-shot: the watch is already removed, and the signal is
                // consumed rather than propagated.
                watch();
                return;
            }
        }
        let peer = state.peer.clone();
        let consumer = state.consumer.clone();
        if peer.is_none() && consumer.is_none() {
            if let Some(fallback) = state.fallback.clone() {
                drop(state);
                fallback(item);
                return;
            }
            state.dropped += 1;
            if state.dropped == 1 {
                warn!(point = %self.name, "point routes nowhere, dropping items");
            }
            return;
        }
        drop(state);
        if let Some(peer) = peer {
            peer.push(item);
        } else if let Some(consumer) = consumer {
            consumer(item);
        }
    }
}
