use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time for run bookkeeping (report timestamps, snapshot
/// times). Abstracted so tests can pin the time.
pub trait SystemClock: std::fmt::Debug + Send + Sync {
    fn get_current_time_in_s(&self) -> i64;
    fn get_current_time_in_ms(&self) -> i64;
}

pub type SharedClock = Arc<dyn SystemClock>;

#[derive(Debug, Clone, Default)]
pub struct Clock;

impl Clock {
    pub fn shared() -> SharedClock {
        Arc::new(Clock)
    }

    fn get_system_time_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
    }
}

impl SystemClock for Clock {
    fn get_current_time_in_s(&self) -> i64 {
        self.get_current_time_in_ms() / 1000
    }

    fn get_current_time_in_ms(&self) -> i64 {
        Self::get_system_time_ms()
    }
}
