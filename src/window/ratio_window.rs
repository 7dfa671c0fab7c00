use std::collections::VecDeque;

/// One boolean sample fed to a [`RatioWindow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Frame time in seconds.
    pub time: f64,
    pub hit: bool,
}

impl Observation {
    pub fn new(time: f64, hit: bool) -> Self {
        Self { time, hit }
    }
}

/// Debounces a flickering per-frame signal.
///
/// Keeps the last `length` observations and reports a hit once the share of
/// positive observations reaches `threshold`. A zero-length window keeps no
/// history and passes the current observation straight through.
#[derive(Debug, Clone)]
pub struct RatioWindow {
    history: VecDeque<Observation>,
    length: usize,
    threshold: f64,
    positives: usize,
}

impl RatioWindow {
    /// Create a window; `threshold` is clamped to [0, 1].
    pub fn new(length: usize, threshold: f64) -> Self {
        let threshold = if threshold.is_nan() {
            1.0
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self {
            history: VecDeque::with_capacity(length + 1),
            length,
            threshold,
            positives: 0,
        }
    }

    /// Create a window that fires once `min_hits` of the last `length`
    /// observations are positive.
    pub fn with_min_hits(length: usize, min_hits: f64) -> Self {
        if length == 0 {
            return Self::new(0, 1.0);
        }
        Self::new(length, min_hits / length as f64)
    }

    /// Record an observation and report whether the window is firing.
    pub fn insert(&mut self, observation: Observation) -> bool {
        if self.length == 0 {
            return observation.hit;
        }

        self.history.push_back(observation);
        if observation.hit {
            self.positives += 1;
        }
        while self.history.len() > self.length {
            if let Some(evicted) = self.history.pop_front() {
                if evicted.hit {
                    self.positives -= 1;
                }
            }
        }

        self.ratio() >= self.threshold
    }

    /// Share of positive observations currently held, 0 when empty.
    pub fn ratio(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.positives as f64 / self.history.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Drop all history, e.g. after an alert has been raised.
    pub fn reset(&mut self) {
        self.history.clear();
        self.positives = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(window: &mut RatioWindow, hits: &[bool]) -> Vec<bool> {
        hits.iter()
            .enumerate()
            .map(|(i, &hit)| window.insert(Observation::new(i as f64, hit)))
            .collect()
    }

    #[test]
    fn test_ratio_reaches_threshold() {
        let mut window = RatioWindow::new(5, 0.6);
        let out = feed(&mut window, &[true, true, true, false, false]);
        assert_eq!(out.last(), Some(&true)); // 3/5

        // Evicts the oldest positive: 2/5
        assert!(!window.insert(Observation::new(5.0, false)));
        assert!((window.ratio() - 0.4).abs() < 1e-9);
        assert_eq!(window.len(), 5);
    }

    #[test]
    fn test_zero_length_passes_through() {
        let mut window = RatioWindow::new(0, 0.5);
        assert!(window.insert(Observation::new(0.0, true)));
        assert!(!window.insert(Observation::new(1.0, false)));
        assert!(window.is_empty());
    }

    #[test]
    fn test_with_min_hits() {
        let window = RatioWindow::with_min_hits(10, 3.0);
        assert!((window.threshold() - 0.3).abs() < 1e-9);

        let clamped = RatioWindow::with_min_hits(4, 8.0);
        assert_eq!(clamped.threshold(), 1.0);

        let negative = RatioWindow::with_min_hits(4, -1.0);
        assert_eq!(negative.threshold(), 0.0);

        let mut degenerate = RatioWindow::with_min_hits(0, 3.0);
        assert!(degenerate.insert(Observation::new(0.0, true)));
        assert!(!degenerate.insert(Observation::new(0.0, false)));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut window = RatioWindow::new(3, 1.0);
        feed(&mut window, &[false; 10]);
        assert_eq!(window.len(), 3);
        let out = feed(&mut window, &[true, true, true]);
        assert_eq!(out, vec![false, false, true]);
    }

    #[test]
    fn test_reset() {
        let mut window = RatioWindow::new(3, 0.5);
        feed(&mut window, &[true, true]);
        window.reset();
        assert!(window.is_empty());
        assert_eq!(window.ratio(), 0.0);
        assert!(!window.insert(Observation::new(3.0, false)));
    }
}
