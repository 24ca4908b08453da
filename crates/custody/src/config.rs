//! Tracker configuration

/// Configuration for a [`Tracker`](crate::Tracker).
///
/// Controls how much the tracker logs and how much history its ledger
/// keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Emit a `trace` event for every handle operation on tracked values
    pub trace: bool,

    /// Keep records of finalized values in the ledger
    pub retain_destroyed: bool,

    /// Name attached to this tracker's log events
    pub label: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            trace: false,
            retain_destroyed: true,
            label: None,
        }
    }
}

impl TrackerConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable per-operation tracing.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Choose whether finalized records stay in the ledger.
    pub fn with_retain_destroyed(mut self, retain: bool) -> Self {
        self.retain_destroyed = retain;
        self
    }

    /// Attach a label to log events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub(crate) fn label_str(&self) -> &str {
        self.label.as_deref().unwrap_or("custody")
    }
}
