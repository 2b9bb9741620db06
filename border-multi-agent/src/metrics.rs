//! Metrics of a runner.
//!
//! [`MetricsLogger`] keeps a set of named statistics, each with a fixed reduction,
//! and reduces them into a [`Record`](crate::record::Record) on demand.
mod logger;
pub use logger::{MetricsLogger, Reduce};

/// Mean length of the completed episodes, over the smoothing window.
pub const EPISODE_LEN_MEAN: &str = "episode_len_mean";
/// Minimal length of the completed episodes, over the smoothing window.
pub const EPISODE_LEN_MIN: &str = "episode_len_min";
/// Maximal length of the completed episodes, over the smoothing window.
pub const EPISODE_LEN_MAX: &str = "episode_len_max";
/// Mean return of the completed episodes, over the smoothing window.
pub const EPISODE_RETURN_MEAN: &str = "episode_return_mean";
/// Minimal return of the completed episodes, over the smoothing window.
pub const EPISODE_RETURN_MIN: &str = "episode_return_min";
/// Maximal return of the completed episodes, over the smoothing window.
pub const EPISODE_RETURN_MAX: &str = "episode_return_max";
/// Mean wall-clock duration of the completed episodes in seconds.
pub const EPISODE_DURATION_SEC_MEAN: &str = "episode_duration_sec_mean";
/// Prefix of the mean returns of each agent.
pub const AGENT_EPISODE_RETURNS_MEAN: &str = "agent_episode_returns_mean";
/// Prefix of the mean returns of each module.
pub const MODULE_EPISODE_RETURNS_MEAN: &str = "module_episode_returns_mean";
/// Prefix of the mean number of steps of each agent in the completed episodes.
pub const AGENT_STEPS: &str = "agent_steps";
/// Number of episodes completed since the last metrics pull.
pub const NUM_EPISODES: &str = "num_episodes";
/// Environment steps sampled since the last metrics pull.
pub const NUM_ENV_STEPS_SAMPLED: &str = "num_env_steps_sampled";
/// Environment steps sampled over the lifetime of the runner.
pub const NUM_ENV_STEPS_SAMPLED_LIFETIME: &str = "num_env_steps_sampled_lifetime";
/// Prefix of the agent steps sampled since the last metrics pull.
pub const NUM_AGENT_STEPS_SAMPLED: &str = "num_agent_steps_sampled";
/// Prefix of the agent steps sampled over the lifetime of the runner.
pub const NUM_AGENT_STEPS_SAMPLED_LIFETIME: &str = "num_agent_steps_sampled_lifetime";
/// Prefix of the module steps sampled since the last metrics pull.
pub const NUM_MODULE_STEPS_SAMPLED: &str = "num_module_steps_sampled";
/// Version of the module weights in use.
pub const WEIGHTS_SEQ_NO: &str = "weights_seq_no";
/// Prefix of the module steps sampled over the lifetime of the runner.
pub const NUM_MODULE_STEPS_SAMPLED_LIFETIME: &str = "num_module_steps_sampled_lifetime";
