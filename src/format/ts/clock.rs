use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;

/// Clock a statistics event was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Program clock reference, 27 MHz ticks
    Pcr,
    /// Original program clock reference, 27 MHz ticks
    Opcr,
    /// Presentation timestamp, 90 kHz ticks
    Pts,
    /// Decoding timestamp, 90 kHz ticks
    Dts,
}

impl ClockKind {
    pub fn label(self) -> &'static str {
        match self {
            ClockKind::Pcr => "PCR",
            ClockKind::Opcr => "OPCR",
            ClockKind::Pts => "PTS",
            ClockKind::Dts => "DTS",
        }
    }
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One clock sample observed on the packet path.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsEvent {
    pub pid: u16,
    /// Byte offset of the packet carrying the sample
    pub offset: u64,
    pub kind: ClockKind,
    /// Raw ticks in the clock's own base
    pub value: u64,
    pub emitted_at: DateTime<Utc>,
}

/// Receiver of statistics events.
///
/// Delivery is best effort: `emit` must not block and a `false` return
/// only means the event was lost.
pub trait StatsSink: Send {
    fn emit(&mut self, event: StatsEvent) -> bool;
}

impl StatsSink for mpsc::Sender<StatsEvent> {
    fn emit(&mut self, event: StatsEvent) -> bool {
        self.try_send(event).is_ok()
    }
}

impl StatsSink for mpsc::UnboundedSender<StatsEvent> {
    fn emit(&mut self, event: StatsEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Turns clock samples into statistics events when enabled.
#[derive(Default)]
pub struct ClockRecorder {
    enabled: bool,
    sink: Option<Box<dyn StatsSink>>,
    dropped: u64,
}

impl fmt::Debug for ClockRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockRecorder")
            .field("enabled", &self.enabled)
            .field("has_sink", &self.sink.is_some())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl ClockRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn with_sink(mut self, sink: impl StatsSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn StatsSink>>) {
        self.sink = sink;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Events the sink refused since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn record_pcr(&mut self, pid: u16, offset: u64, ticks: u64) {
        self.record(pid, offset, ClockKind::Pcr, ticks);
    }

    pub fn record_opcr(&mut self, pid: u16, offset: u64, ticks: u64) {
        self.record(pid, offset, ClockKind::Opcr, ticks);
    }

    pub fn record_pts(&mut self, pid: u16, offset: u64, ticks: u64) {
        self.record(pid, offset, ClockKind::Pts, ticks);
    }

    pub fn record_dts(&mut self, pid: u16, offset: u64, ticks: u64) {
        self.record(pid, offset, ClockKind::Dts, ticks);
    }

    fn record(&mut self, pid: u16, offset: u64, kind: ClockKind, value: u64) {
        if !self.enabled {
            return;
        }
        log::trace!("{} on PID {:#06x} at {}: {}", kind, pid, offset, value);
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let event = StatsEvent {
            pid,
            offset,
            kind,
            value,
            emitted_at: Utc::now(),
        };
        if !sink.emit(event) {
            self.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disabled_recorder_emits_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recorder = ClockRecorder::new(false).with_sink(tx);
        recorder.record_pcr(0x100, 0, 27_000_000);
        assert!(rx.try_recv().is_err());

        recorder.set_enabled(true);
        recorder.record_pts(0x101, 376, 90_000);
        recorder.record_dts(0x101, 376, 87_000);
        let pts = rx.try_recv().unwrap();
        assert_eq!((pts.pid, pts.offset, pts.kind, pts.value), (0x101, 376, ClockKind::Pts, 90_000));
        assert_eq!(rx.try_recv().unwrap().kind, ClockKind::Dts);
    }

    #[test]
    fn test_full_channel_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut recorder = ClockRecorder::new(true).with_sink(tx);
        recorder.record_pcr(0x100, 0, 1);
        recorder.record_opcr(0x100, 0, 2);
        recorder.record_pcr(0x100, 188, 3);
        assert_eq!(recorder.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().value, 1);

        drop(rx);
        recorder.record_pcr(0x100, 376, 4);
        assert_eq!(recorder.dropped(), 3);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ClockKind::Opcr.to_string(), "OPCR");
        assert_eq!(ClockKind::Dts.label(), "DTS");
    }
}
