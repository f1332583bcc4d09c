use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot delayed callback port.
pub trait Timer: Send + Sync {
    /// Schedule `callback` to run once after `delay`. Cancelling (or
    /// dropping) the returned guard before the delay elapses prevents the
    /// callback from running.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerGuard;
}

pub(crate) struct TimerControl {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl TimerControl {
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap()
    }

    /// Block until the deadline passes or the timer is cancelled.
    /// Returns true if the callback should fire.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.cancelled.lock().unwrap();
        loop {
            if *cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self.wake.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
        }
    }
}

/// Handle to a scheduled callback. Cancels on drop.
pub struct TimerGuard {
    control: Arc<TimerControl>,
}

impl TimerGuard {
    pub(crate) fn with_control() -> (TimerGuard, Arc<TimerControl>) {
        let control = Arc::new(TimerControl {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
        });
        (
            TimerGuard {
                control: Arc::clone(&control),
            },
            control,
        )
    }

    pub fn cancel(&self) {
        let mut cancelled = self.control.cancelled.lock().unwrap();
        *cancelled = true;
        self.control.wake.notify_all();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Thread-backed timer used by the daemon. Each scheduled callback gets a
/// short-lived thread that sleeps on a condvar so cancellation is prompt.
#[derive(Debug, Default)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerGuard {
        let (guard, control) = TimerGuard::with_control();
        let deadline = Instant::now() + delay;
        std::thread::spawn(move || {
            if control.wait_until(deadline) {
                callback();
            }
        });
        guard
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn scheduled_callback_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = ThreadTimer;
        let fired_in_cb = Arc::clone(&fired);
        let guard = timer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(guard);
    }

    #[test]
    fn cancelled_callback_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = ThreadTimer;
        let fired_in_cb = Arc::clone(&fired);
        let guard = timer.schedule(
            Duration::from_secs(60),
            Box::new(move || {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        guard.cancel();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_the_guard_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = ThreadTimer;
        let fired_in_cb = Arc::clone(&fired);
        drop(timer.schedule(
            Duration::from_secs(60),
            Box::new(move || {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
