use std::time::{Duration, Instant};

/// Minimum-interval gate for a repeating signal.
///
/// Some audio backends report one end-of-track more than once; only the first
/// signal inside `interval` is let through.
#[derive(Debug, Clone)]
pub struct Debounce {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    pub fn accept(&mut self) -> bool {
        self.accept_at(Instant::now())
    }

    pub fn accept_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted
            && now.saturating_duration_since(last) < self.interval
        {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_signal_inside_window_is_accepted_once() {
        let mut debounce = Debounce::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(debounce.accept_at(start));
        assert!(!debounce.accept_at(start + Duration::from_millis(5)));
    }

    #[test]
    fn signal_after_window_is_accepted() {
        let mut debounce = Debounce::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(debounce.accept_at(start));
        assert!(debounce.accept_at(start + Duration::from_millis(100)));
    }

    #[test]
    fn rejected_signals_do_not_extend_window() {
        let mut debounce = Debounce::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(debounce.accept_at(start));
        assert!(!debounce.accept_at(start + Duration::from_millis(60)));
        assert!(debounce.accept_at(start + Duration::from_millis(120)));
    }

    #[test]
    fn zero_interval_accepts_everything() {
        let mut debounce = Debounce::new(Duration::ZERO);
        let start = Instant::now();
        assert!(debounce.accept_at(start));
        assert!(debounce.accept_at(start));
    }
}
