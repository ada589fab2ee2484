use std::sync::{Arc, Mutex};

use crate::types::RunEvent;

pub trait RunObserver: Send {
    fn notify(&mut self, event: &RunEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn notify(&mut self, _event: &RunEvent) {}
}

#[derive(Clone, Debug, Default)]
pub struct LogObserver {
    pub label: String,
}

impl RunObserver for LogObserver {
    fn notify(&mut self, event: &RunEvent) {
        log::debug!("[run {}] {event:?}", self.label);
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn take(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl RunObserver for EventLog {
    fn notify(&mut self, event: &RunEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
