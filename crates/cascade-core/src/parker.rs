use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::Instant;

/// One-shot park/unpark cell for exactly one blocked thread.
///
/// Every blocking reader owns its own `Parker`; the completing thread
/// unparks all of them. Parking a second thread concurrently on the same
/// cell is a programming error and panics. Once notified the cell stays
/// notified, so a late `park` returns immediately.
pub(crate) struct Parker {
    notified: AtomicBool,
    parked: Mutex<Option<Thread>>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            parked: Mutex::new(None),
        }
    }

    /// Block the calling thread until [`Parker::unpark`].
    ///
    /// Resilient to spurious wakeups of the underlying thread primitive.
    pub(crate) fn park(&self) {
        if self.notified.load(Ordering::Acquire) {
            return;
        }
        self.install();
        while !self.notified.load(Ordering::Acquire) {
            thread::park();
        }
        self.clear();
    }

    /// As [`Parker::park`], but give up at `deadline`.
    ///
    /// Returns true when unparked, false when the deadline elapsed first.
    pub(crate) fn park_deadline(&self, deadline: Instant) -> bool {
        if self.notified.load(Ordering::Acquire) {
            return true;
        }
        self.install();
        loop {
            if self.notified.load(Ordering::Acquire) {
                self.clear();
                return true;
            }
            match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => thread::park_timeout(remaining),
                _ => {
                    self.clear();
                    return false;
                }
            }
        }
    }

    /// Wake the parked thread, if any, and latch the notification.
    pub(crate) fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        let parked = self
            .parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(thread) = parked {
            thread.unpark();
        }
    }

    fn install(&self) {
        let mut slot = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        assert!(slot.is_none(), "another thread is already parked");
        *slot = Some(thread::current());
    }

    fn clear(&self) {
        self.parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn unpark_releases_a_parked_thread() {
        let parker = Arc::new(Parker::new());
        let waker = parker.clone();
        let waiter = thread::spawn(move || parker.park());
        thread::sleep(Duration::from_millis(20));
        waker.unpark();
        waiter.join().unwrap();
    }

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new();
        parker.unpark();
        parker.park();
    }

    #[test]
    fn park_deadline_times_out() {
        let parker = Parker::new();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(!parker.park_deadline(deadline));
        parker.unpark();
        assert!(parker.park_deadline(Instant::now() + Duration::from_millis(30)));
    }

    #[test]
    fn second_concurrent_parker_is_rejected() {
        let parker = Arc::new(Parker::new());
        let first = parker.clone();
        let holder = thread::spawn(move || first.park());
        thread::sleep(Duration::from_millis(20));

        let second = parker.clone();
        let clash = thread::spawn(move || second.park());
        assert!(clash.join().is_err(), "second parker must panic");

        parker.unpark();
        holder.join().unwrap();
    }
}
