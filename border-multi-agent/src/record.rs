//! Key-value records.
//!
//! A [`Record`] is returned by a metrics pull of the runner
//! ([`MultiAgentEnvRunner::get_metrics`](crate::MultiAgentEnvRunner::get_metrics)),
//! while [`RecordValue`] also stores the extra outputs of a module in episodes.
//!
//! ```rust
//! use border_multi_agent::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("episode_len_mean", RecordValue::Scalar(4.0));
//! record.insert("agent_steps/a0", RecordValue::Scalar(2.0));
//! assert_eq!(record.get_scalar("episode_len_mean").unwrap(), 4.0);
//! assert_eq!(record.scalars_with_prefix("agent_steps")["a0"], 2.0);
//! ```
mod base;

pub use base::{Record, RecordValue};
