use std::sync::{Arc, Mutex};

use crate::progress::{ProgressEvent, ProgressSink};

/// Sink keeping every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `type` tags of the received events, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ProgressEvent::kind).collect()
    }

    /// Tables announced by `table-start`, in order.
    pub fn started_tables(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::TableStart { table, .. } => Some(table),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
