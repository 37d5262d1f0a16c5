use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maps the total work of a task and a thread count to the work each
/// compute thread performs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParallelModel {
    /// `alpha` is the parallelizable fraction of the work. Thread 0 also
    /// carries the sequential part.
    Amdahl { alpha: f64 },
    /// Every thread does `total / (n * efficiency)`.
    ConstantEfficiency { efficiency: f64 },
}

impl Default for ParallelModel {
    fn default() -> Self {
        ParallelModel::Amdahl { alpha: 1.0 }
    }
}

impl ParallelModel {
    pub fn amdahl(alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::invalid_argument(format!("Amdahl alpha must be in [0, 1], got {}", alpha)));
        }
        Ok(ParallelModel::Amdahl { alpha })
    }

    pub fn constant_efficiency(efficiency: f64) -> Result<Self> {
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(Error::invalid_argument(format!("Parallel efficiency must be in (0, 1], got {}", efficiency)));
        }
        Ok(ParallelModel::ConstantEfficiency { efficiency })
    }

    /// Re-checks parameters, for models that came in through serde.
    pub fn validate(&self) -> Result<()> {
        match *self {
            ParallelModel::Amdahl { alpha } => Self::amdahl(alpha).map(|_| ()),
            ParallelModel::ConstantEfficiency { efficiency } => Self::constant_efficiency(efficiency).map(|_| ()),
        }
    }

    /// Work (in flops) performed by each of `num_threads` threads.
    ///
    /// # Returns
    /// A vector of exactly `max(num_threads, 1)` entries.
    pub fn work_per_thread(&self, total_flops: f64, num_threads: u32) -> Vec<f64> {
        let n = num_threads.max(1) as usize;

        match *self {
            ParallelModel::Amdahl { alpha } => {
                let sequential_work = (1.0 - alpha) * total_flops;
                let parallel_share = alpha * total_flops / n as f64;

                let mut work = vec![parallel_share; n];
                work[0] += sequential_work;
                work
            }
            ParallelModel::ConstantEfficiency { efficiency } => {
                vec![total_flops / (n as f64 * efficiency); n]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amdahl_perfectly_parallel_splits_evenly() {
        let work = ParallelModel::default().work_per_thread(400.0, 4);
        assert_eq!(work, vec![100.0; 4]);
    }

    #[test]
    fn test_amdahl_sequential_part_lands_on_first_thread() {
        let work = ParallelModel::amdahl(0.5).unwrap().work_per_thread(400.0, 2);
        assert_eq!(work, vec![300.0, 100.0]);
    }

    #[test]
    fn test_constant_efficiency_inflates_work() {
        let work = ParallelModel::constant_efficiency(0.5).unwrap().work_per_thread(100.0, 2);
        assert_eq!(work, vec![100.0, 100.0]);
    }

    #[test]
    fn test_zero_threads_behaves_as_one() {
        let work = ParallelModel::default().work_per_thread(10.0, 0);
        assert_eq!(work, vec![10.0]);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(ParallelModel::amdahl(1.5).is_err());
        assert!(ParallelModel::constant_efficiency(0.0).is_err());
        assert!(ParallelModel::Amdahl { alpha: -0.1 }.validate().is_err());
    }

    #[test]
    fn test_serde_tagged_representation() {
        let model: ParallelModel = serde_json::from_str(r#"{ "type": "constant_efficiency", "efficiency": 0.8 }"#).unwrap();
        assert_eq!(model, ParallelModel::ConstantEfficiency { efficiency: 0.8 });
    }
}
