//! Resource footprint triple.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// RAM, CPU and storage consumed (or reserved) by a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub ram_mb: f64,
    pub cpu_cores: f64,
    pub storage_gb: f64,
}

impl Footprint {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(ram_mb: f64, cpu_cores: f64, storage_gb: f64) -> Self {
        Self {
            ram_mb,
            cpu_cores,
            storage_gb,
        }
    }

    /// Multiply every dimension by `factor`.
    #[must_use]
    pub fn scale(self, factor: f64) -> Self {
        Self {
            ram_mb: self.ram_mb * factor,
            cpu_cores: self.cpu_cores * factor,
            storage_gb: self.storage_gb * factor,
        }
    }

    /// `count` instances of this footprint.
    #[must_use]
    pub fn times(self, count: u32) -> Self {
        self.scale(f64::from(count))
    }
}

impl Add for Footprint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            ram_mb: self.ram_mb + rhs.ram_mb,
            cpu_cores: self.cpu_cores + rhs.cpu_cores,
            storage_gb: self.storage_gb + rhs.storage_gb,
        }
    }
}

impl AddAssign for Footprint {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Footprint {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_and_times() {
        let one = Footprint::new(512.0, 0.25, 5.0);
        let total: Footprint = [one, one, one].into_iter().sum();
        assert_eq!(total, one.times(3));
        assert_eq!(total.ram_mb, 1536.0);
    }
}
