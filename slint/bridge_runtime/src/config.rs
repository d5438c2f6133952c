use std::time::Duration;

pub const DEFAULT_UI_QUEUE_CAP: usize = 256;

pub const UI_QUEUE_CAP_ENV: &str = "CALLBRIDGE_UI_QUEUE_CAP";
pub const CALL_TIMEOUT_ENV: &str = "CALLBRIDGE_CALL_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Bound of the UI dispatch queue; submitters block past it.
    pub ui_queue_capacity: usize,
    /// How long a synchronous outbound call waits before it is abandoned.
    /// `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ui_queue_capacity: DEFAULT_UI_QUEUE_CAP,
            call_timeout: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ui_queue_capacity =
            parse_positive(lookup(UI_QUEUE_CAP_ENV)).unwrap_or(DEFAULT_UI_QUEUE_CAP);
        let call_timeout = parse_positive(lookup(CALL_TIMEOUT_ENV))
            .map(|ms| Duration::from_millis(ms as u64));

        Self {
            ui_queue_capacity,
            call_timeout,
        }
    }

    pub fn with_ui_queue_capacity(mut self, capacity: usize) -> Self {
        self.ui_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

fn parse_positive(raw: Option<String>) -> Option<usize> {
    raw.and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}
