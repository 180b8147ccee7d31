use std::sync::{
   Arc,
   atomic::{AtomicI64, Ordering},
};

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync {
   fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
   fn now_ms(&self) -> i64 {
      chrono::Utc::now().timestamp_millis()
   }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
   fn now_ms(&self) -> i64 {
      (**self).now_ms()
   }
}

/// Manually advanced clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
   now: AtomicI64,
}

impl ManualClock {
   pub const fn new(start_ms: i64) -> Self {
      Self { now: AtomicI64::new(start_ms) }
   }

   pub fn advance_ms(&self, delta: i64) {
      self.now.fetch_add(delta, Ordering::SeqCst);
   }

   pub fn set_ms(&self, now: i64) {
      self.now.store(now, Ordering::SeqCst);
   }
}

impl Clock for ManualClock {
   fn now_ms(&self) -> i64 {
      self.now.load(Ordering::SeqCst)
   }
}
