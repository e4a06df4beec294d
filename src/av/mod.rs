use std::fmt;
use std::time::Duration;

mod packet;
mod sink;

pub use packet::*;
pub use sink::*;

/// Result of pushing data downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    Ok,
    /// Nobody downstream consumes this stream
    NotLinked,
    Flushing,
    Eos,
    NotNegotiated,
    Error,
}

impl FlowStatus {
    pub fn is_ok(self) -> bool {
        self == FlowStatus::Ok
    }

    pub fn name(self) -> &'static str {
        match self {
            FlowStatus::Ok => "ok",
            FlowStatus::NotLinked => "not-linked",
            FlowStatus::Flushing => "flushing",
            FlowStatus::Eos => "eos",
            FlowStatus::NotNegotiated => "not-negotiated",
            FlowStatus::Error => "error",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Out-of-band events sent to stream outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Start of the timeline. `stop` is only known once the duration is.
    SegmentStart {
        start: Option<Duration>,
        stop: Option<Duration>,
    },
    EndOfStream,
}

/// Broad category of an exposed elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Subpicture,
    Private,
}

impl StreamKind {
    pub fn prefix(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subpicture => "subpicture",
            StreamKind::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsValue {
    Int(i32),
    Bool(bool),
    Str(&'static str),
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsValue::Int(v) => write!(f, "(int){}", v),
            CapsValue::Bool(v) => write!(f, "(boolean){}", v),
            CapsValue::Str(v) => write!(f, "(string){}", v),
        }
    }
}

/// Media type description attached to the output of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    pub media_type: &'static str,
    pub fields: Vec<(&'static str, CapsValue)>,
}

impl Caps {
    pub fn new(media_type: &'static str) -> Self {
        Self {
            media_type,
            fields: Vec::new(),
        }
    }

    pub fn with_int(mut self, name: &'static str, value: i32) -> Self {
        self.fields.push((name, CapsValue::Int(value)));
        self
    }

    pub fn with_bool(mut self, name: &'static str, value: bool) -> Self {
        self.fields.push((name, CapsValue::Bool(value)));
        self
    }

    pub fn with_str(mut self, name: &'static str, value: &'static str) -> Self {
        self.fields.push((name, CapsValue::Str(value)));
        self
    }

    pub fn field(&self, name: &str) -> Option<&CapsValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type)?;
        for (name, value) in &self.fields {
            write!(f, ", {}={}", name, value)?;
        }
        Ok(())
    }
}

/// Externally visible output of one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub pid: u16,
    pub name: String,
    pub kind: StreamKind,
    pub caps: Caps,
}

impl StreamHandle {
    pub fn new(pid: u16, kind: StreamKind, caps: Caps) -> Self {
        Self {
            pid,
            name: format!("{}_{:04x}", kind.prefix(), pid),
            kind,
            caps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_naming() {
        let caps = Caps::new("video/mpeg")
            .with_int("mpegversion", 2)
            .with_bool("systemstream", false);
        let handle = StreamHandle::new(0x1e1, StreamKind::Video, caps);
        assert_eq!(handle.name, "video_01e1");
        assert_eq!(
            handle.caps.to_string(),
            "video/mpeg, mpegversion=(int)2, systemstream=(boolean)false"
        );
        assert_eq!(handle.caps.field("mpegversion"), Some(&CapsValue::Int(2)));
    }
}
