#![forbid(unsafe_code)]

//! In-memory diagnostics event log.
//!
//! Typed events with a JSON payload, kept for test assertions and debug
//! tooling. Never persisted; the log holds the most recent `capacity` events
//! and can be exported as JSONL.

use archicanvas_core::ring::RingBuffer;
use serde::Serialize;
use serde_json::Value;

/// Kind of a diagnostics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// The stability tracker recommended a freeze.
    StabilityWarning,
    /// The user resumed a paused canvas.
    ManualResume,
    /// Estimated memory grew sharply between frames.
    MemorySpike,
    /// Breakers on two layers opened close together.
    CanvasLayerCorrelation,
    /// A user interaction on a canvas layer.
    CanvasLayerInteraction,
}

impl DiagnosticKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StabilityWarning => "stability-warning",
            Self::ManualResume => "manual-resume",
            Self::MemorySpike => "memory-spike",
            Self::CanvasLayerCorrelation => "canvas-layer-correlation",
            Self::CanvasLayerInteraction => "canvas-layer-interaction",
        }
    }
}

/// One logged event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    pub payload: Value,
}

/// Bounded log of diagnostics events.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    events: RingBuffer<DiagnosticEvent>,
    next_seq: u64,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(512)
    }
}

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RingBuffer::new(capacity),
            next_seq: 1,
        }
    }

    /// Append an event and return its sequence number.
    pub fn record(&mut self, kind: DiagnosticKind, payload: Value) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(target: "archicanvas.diagnostics", seq, kind = kind.as_str(), %payload, "diagnostic");
        self.events.push(DiagnosticEvent { seq, kind, payload });
        seq
    }

    /// Events oldest first.
    pub fn events(&self) -> impl Iterator<Item = &DiagnosticEvent> + '_ {
        self.events.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> Vec<&DiagnosticEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn last(&self) -> Option<&DiagnosticEvent> {
        self.events.newest()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// One JSON object per line, oldest first.
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for event in self.events.iter() {
            if let Ok(line) = serde_json::to_string(event) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}
