//! Storage and reduction of logged values.
use crate::record::{Record, RecordValue};
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};

/// How the values logged under a key are reduced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reduce {
    /// Mean over the last `window` values.
    Mean {
        /// The number of values kept.
        window: usize,
    },

    /// Minimum over the last `window` values.
    Min {
        /// The number of values kept.
        window: usize,
    },

    /// Maximum over the last `window` values.
    Max {
        /// The number of values kept.
        window: usize,
    },

    /// Sum of all values.
    Sum {
        /// Resets the sum to zero after each [`MetricsLogger::reduce`].
        clear_on_reduce: bool,
    },
}

/// Values logged under a single key.
#[derive(Clone, Debug)]
struct Stats {
    reduce: Reduce,
    values: VecDeque<f64>,
}

fn min(vs: &VecDeque<f64>) -> Option<f64> {
    vs.iter().copied().min_by(|x, y| x.total_cmp(y))
}

fn max(vs: &VecDeque<f64>) -> Option<f64> {
    vs.iter().copied().max_by(|x, y| x.total_cmp(y))
}

fn mean(vs: &VecDeque<f64>) -> Option<f64> {
    match vs.len() {
        0 => None,
        n => Some(vs.iter().sum::<f64>() / n as f64),
    }
}

impl Stats {
    fn new(reduce: Reduce) -> Self {
        Self {
            reduce,
            values: VecDeque::new(),
        }
    }

    fn push(&mut self, value: f64) {
        match self.reduce {
            Reduce::Mean { window } | Reduce::Min { window } | Reduce::Max { window } => {
                self.values.push_back(value);
                while self.values.len() > window.max(1) {
                    self.values.pop_front();
                }
            }
            // A sum only needs the running total.
            Reduce::Sum { .. } => {
                let total = self.values.pop_front().unwrap_or(0.0) + value;
                self.values.push_back(total);
            }
        }
    }

    /// Returns `None` for windowed stats without values.
    fn peek(&self) -> Option<f64> {
        match self.reduce {
            Reduce::Mean { .. } => mean(&self.values),
            Reduce::Min { .. } => min(&self.values),
            Reduce::Max { .. } => max(&self.values),
            Reduce::Sum { .. } => Some(self.values.front().copied().unwrap_or(0.0)),
        }
    }
}

/// Keeps logged values and reduces them on request.
///
/// The reduction of a key is fixed by the first call logging it.
///
/// ```rust
/// use border_multi_agent::metrics::{MetricsLogger, Reduce};
///
/// let mut metrics = MetricsLogger::new();
/// let per_call = Reduce::Sum { clear_on_reduce: true };
/// metrics.log_value("env_steps", 1.0, per_call);
/// metrics.log_value("env_steps", 1.0, per_call);
/// assert_eq!(metrics.peek("env_steps"), Some(2.0));
///
/// let record = metrics.reduce();
/// assert_eq!(record.get_scalar("env_steps").unwrap(), 2.0);
/// assert_eq!(metrics.peek("env_steps"), Some(0.0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MetricsLogger {
    stats: BTreeMap<String, Stats>,
}

impl MetricsLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs a value under `key`.
    pub fn log_value(&mut self, key: &str, value: f64, reduce: Reduce) {
        let stats = self
            .stats
            .entry(key.to_string())
            .or_insert_with(|| Stats::new(reduce));
        if stats.reduce != reduce {
            warn!(
                "Metric {} was logged with {:?}, ignoring {:?}",
                key, stats.reduce, reduce
            );
        }
        stats.push(value);
    }

    /// Replaces all values logged under `key` with `value`.
    pub fn set_value(&mut self, key: &str, value: f64, reduce: Reduce) {
        let mut stats = Stats::new(reduce);
        stats.push(value);
        if let Some(old) = self.stats.insert(key.to_string(), stats) {
            if old.reduce != reduce {
                debug!("Metric {} changed its reduction to {:?}", key, reduce);
            }
        }
    }

    /// Logs each value of `values` under `"{prefix}/{key}"`.
    pub fn log_dict<K, I>(&mut self, prefix: &str, values: I, reduce: Reduce)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, f64)>,
    {
        for (k, v) in values {
            self.log_value(&format!("{}/{}", prefix, k.as_ref()), v, reduce);
        }
    }

    /// Returns the current reduced value of `key` without clearing it.
    pub fn peek(&self, key: &str) -> Option<f64> {
        self.stats.get(key).and_then(Stats::peek)
    }

    /// Returns `true` if `key` has been logged.
    pub fn contains(&self, key: &str) -> bool {
        self.stats.contains_key(key)
    }

    /// Reduces all stats into a record, then clears the per-call sums.
    ///
    /// Windowed stats without values are left out.
    pub fn reduce(&mut self) -> Record {
        let mut record = Record::empty();

        for (key, stats) in self.stats.iter_mut() {
            if let Some(v) = stats.peek() {
                record.insert(key.clone(), RecordValue::Scalar(v as f32));
            }
            if let Reduce::Sum {
                clear_on_reduce: true,
            } = stats.reduce
            {
                stats.values.clear();
            }
        }

        record
    }
}
