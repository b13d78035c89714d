//! Sliding window of mean errors for plateau detection.

use std::collections::VecDeque;

/// Recent mean errors of an optimization run.
#[derive(Debug, Clone)]
pub struct ErrorStatistic {
    values: VecDeque<f64>,
    capacity: usize,
    min: f64,
    max: f64,
    count: usize,
}

impl ErrorStatistic {
    /// Keep at most `capacity` recent values (at least 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    /// Record a value.
    pub fn add(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    /// Values recorded over the whole run.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Most recent value.
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Smallest value seen.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest value seen.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean change per step over the last `width` steps.
    ///
    /// `width` is clamped to the retained history; `None` with fewer than
    /// two values.
    pub fn wide_slope(&self, width: usize) -> Option<f64> {
        let n = self.values.len();
        if n < 2 || width == 0 {
            return None;
        }
        let width = width.min(n - 1);
        let newest = self.values[n - 1];
        let oldest = self.values[n - 1 - width];
        Some((newest - oldest) / width as f64)
    }

    /// No slope over widths `w, w/2, …, 1` exceeds `threshold`.
    pub fn is_plateau(&self, width: usize, threshold: f64) -> bool {
        let mut d = width;
        while d >= 1 {
            match self.wide_slope(d) {
                Some(slope) if slope.abs() <= threshold => {}
                _ => return false,
            }
            d /= 2;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_and_extremes() {
        let mut s = ErrorStatistic::new(3);
        for v in [5.0, 4.0, 3.0, 2.0] {
            s.add(v);
        }
        assert_eq!(s.count(), 4);
        assert_eq!(s.last(), Some(2.0));
        assert_eq!(s.min(), 2.0);
        assert_eq!(s.max(), 5.0);
        // only [4, 3, 2] retained
        assert_relative_eq!(s.wide_slope(10).unwrap(), -1.0);
    }

    #[test]
    fn test_wide_slope_needs_two_values() {
        let mut s = ErrorStatistic::new(4);
        assert!(s.wide_slope(1).is_none());
        s.add(1.0);
        assert!(s.wide_slope(1).is_none());
    }

    #[test]
    fn test_plateau() {
        let mut s = ErrorStatistic::new(5);
        for v in [10.0, 8.0, 7.0, 6.5, 6.4] {
            s.add(v);
        }
        assert!(!s.is_plateau(4, 1e-4));

        let mut flat = ErrorStatistic::new(5);
        for _ in 0..5 {
            flat.add(0.25);
        }
        assert!(flat.is_plateau(4, 1e-4));
    }
}
