use std::sync::{Arc, RwLock};

use crate::domain::clock::clock::SystemClock;

/// Clock frozen at a settable time (milliseconds).
#[derive(Debug, Clone)]
pub struct MockClock {
    pub time_ms: Arc<RwLock<i64>>,
}

impl MockClock {
    pub fn new(time_ms: i64) -> MockClock {
        MockClock { time_ms: Arc::new(RwLock::new(time_ms)) }
    }

    pub fn set_current_time(&self, time_ms: i64) {
        if let Ok(mut guard) = self.time_ms.write() {
            *guard = time_ms;
        }
    }
}

impl SystemClock for MockClock {
    fn get_current_time_in_s(&self) -> i64 {
        self.get_current_time_in_ms() / 1000
    }

    fn get_current_time_in_ms(&self) -> i64 {
        self.time_ms.read().map(|t| *t).unwrap_or_default()
    }
}
