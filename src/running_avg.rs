//! Fixed-window running averages used for velocity/heading smoothing.
//!
//! Ring-buffer scalar and 2-D direction averages, grounded in
//! `running_average`/`direction_average`.

use nalgebra::Vector2;

/// Ring buffer averaging the last `capacity` scalar samples.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    items: Vec<f64>,
    capacity: usize,
    filled: usize,
    next: usize,
    total: f64,
}

impl RunningAverage {
    pub fn new(capacity: usize) -> Self {
        RunningAverage {
            items: vec![0.0; capacity],
            capacity,
            filled: 0,
            next: 0,
            total: 0.0,
        }
    }

    pub fn add_item(&mut self, d: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.filled == self.capacity {
            self.total -= self.items[self.next];
        } else {
            self.filled += 1;
        }
        self.total += d;
        self.items[self.next] = d;
        self.next += 1;
        if self.next == self.capacity {
            self.next = 0;
        }
    }

    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            0.0
        } else {
            self.total / self.filled as f64
        }
    }
}

/// Ring buffer averaging the last `capacity` 2-D samples, normalized to a
/// unit heading vector.
#[derive(Debug, Clone)]
pub struct DirectionAverage {
    items: Vec<Vector2<f64>>,
    capacity: usize,
    filled: usize,
    next: usize,
    total: Vector2<f64>,
}

impl DirectionAverage {
    pub fn new(capacity: usize) -> Self {
        DirectionAverage {
            items: vec![Vector2::zeros(); capacity],
            capacity,
            filled: 0,
            next: 0,
            total: Vector2::zeros(),
        }
    }

    pub fn add_item(&mut self, p: Vector2<f64>) {
        if self.capacity == 0 {
            return;
        }
        if self.filled == self.capacity {
            self.total -= self.items[self.next];
        } else {
            self.filled += 1;
        }
        self.total += p;
        self.items[self.next] = p;
        self.next += 1;
        if self.next == self.capacity {
            self.next = 0;
        }
    }

    /// Unit heading vector, or the zero vector if nothing has been added
    /// yet or the running total happens to cancel out.
    pub fn average(&self) -> Vector2<f64> {
        if self.filled == 0 {
            return Vector2::zeros();
        }
        let mag = self.total.norm();
        if mag == 0.0 {
            Vector2::zeros()
        } else {
            self.total / mag
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn running_average_before_full_divides_by_count_added() {
        let mut avg = RunningAverage::new(4);
        avg.add_item(2.0);
        avg.add_item(4.0);
        assert_eq!(avg.average(), 3.0);
    }

    #[test]
    fn running_average_drops_oldest_once_full() {
        let mut avg = RunningAverage::new(2);
        avg.add_item(10.0);
        avg.add_item(20.0);
        avg.add_item(30.0); // evicts the 10.0
        assert_eq!(avg.average(), 25.0);
    }

    #[test]
    fn empty_running_average_is_zero() {
        let avg = RunningAverage::new(3);
        assert_eq!(avg.average(), 0.0);
    }

    #[test]
    fn direction_average_normalizes_to_unit_length() {
        let mut avg = DirectionAverage::new(4);
        avg.add_item(Vector2::new(3.0, 0.0));
        avg.add_item(Vector2::new(3.0, 0.0));
        let d = avg.average();
        assert!((d.norm() - 1.0).abs() < 1e-12);
        assert!((d.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn direction_average_cancelling_vectors_is_zero() {
        let mut avg = DirectionAverage::new(2);
        avg.add_item(Vector2::new(1.0, 0.0));
        avg.add_item(Vector2::new(-1.0, 0.0));
        assert_eq!(avg.average(), Vector2::zeros());
    }
}
