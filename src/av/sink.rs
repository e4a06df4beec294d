use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BufferList, Event, FlowStatus, StreamHandle};

/// Downstream side of the demuxer, one call per output of one stream.
///
/// Implementations must not block for long: they run on the packet path.
pub trait StreamSink {
    /// A stream output became visible.
    fn stream_exposed(&mut self, _handle: &StreamHandle) {}

    /// A previously exposed stream output went away.
    fn stream_unexposed(&mut self, _handle: &StreamHandle) {}

    fn push(&mut self, handle: &StreamHandle, list: BufferList) -> FlowStatus;

    fn push_event(&mut self, handle: &StreamHandle, event: Event);
}

impl<T: StreamSink + ?Sized> StreamSink for Box<T> {
    fn stream_exposed(&mut self, handle: &StreamHandle) {
        (**self).stream_exposed(handle)
    }

    fn stream_unexposed(&mut self, handle: &StreamHandle) {
        (**self).stream_unexposed(handle)
    }

    fn push(&mut self, handle: &StreamHandle, list: BufferList) -> FlowStatus {
        (**self).push(handle, list)
    }

    fn push_event(&mut self, handle: &StreamHandle, event: Event) {
        (**self).push_event(handle, event)
    }
}

#[derive(Debug, Default)]
pub struct MemorySinkState {
    pub exposed: Vec<StreamHandle>,
    pub unexposed: Vec<StreamHandle>,
    pub pushed: Vec<(u16, BufferList)>,
    pub events: Vec<(u16, Event)>,
    /// Status returned for pushes on a PID, `Ok` when absent
    pub responses: HashMap<u16, FlowStatus>,
}

/// Sink that records everything it receives. Clones share the same state so
/// one clone can be handed to the demuxer and another inspected.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later push on `pid` return `status`.
    pub fn respond_with(&self, pid: u16, status: FlowStatus) {
        self.state.lock().responses.insert(pid, status);
    }

    pub fn pushed(&self) -> Vec<(u16, BufferList)> {
        self.state.lock().pushed.clone()
    }

    pub fn pushed_for(&self, pid: u16) -> Vec<BufferList> {
        self.state
            .lock()
            .pushed
            .iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, list)| list.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<(u16, Event)> {
        self.state.lock().events.clone()
    }

    pub fn exposed(&self) -> Vec<StreamHandle> {
        self.state.lock().exposed.clone()
    }

    pub fn unexposed(&self) -> Vec<StreamHandle> {
        self.state.lock().unexposed.clone()
    }
}

impl StreamSink for MemorySink {
    fn stream_exposed(&mut self, handle: &StreamHandle) {
        self.state.lock().exposed.push(handle.clone());
    }

    fn stream_unexposed(&mut self, handle: &StreamHandle) {
        self.state.lock().unexposed.push(handle.clone());
    }

    fn push(&mut self, handle: &StreamHandle, list: BufferList) -> FlowStatus {
        let mut state = self.state.lock();
        state.pushed.push((handle.pid, list));
        state
            .responses
            .get(&handle.pid)
            .copied()
            .unwrap_or(FlowStatus::Ok)
    }

    fn push_event(&mut self, handle: &StreamHandle, event: Event) {
        self.state.lock().events.push((handle.pid, event));
    }
}
