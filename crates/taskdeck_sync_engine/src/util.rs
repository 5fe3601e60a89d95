//! Small internal helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleeps for `delay`, waking early when `stop` is set.
pub(crate) fn sleep_with_stop(delay: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(25);
    let mut remaining = delay;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stop_cuts_sleep_short() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        sleep_with_stop(Duration::from_secs(5), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
