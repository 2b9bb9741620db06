//! Episode records.
//!
//! A [`MultiAgentEpisode`] holds one trajectory segment of all agents between a reset
//! (or a continuation point) and termination, truncation or an artificial chunk
//! boundary. Each agent's part of it is a [`SingleAgentEpisode`].
//!
//! Lifecycle:
//!
//! 1. [`MultiAgentEpisode::new`] creates an empty record.
//! 2. [`MultiAgentEpisode::add_env_reset`] seeds it with the initial observations.
//! 3. [`MultiAgentEpisode::add_env_step`] appends steps until the episode is done.
//! 4. Either [`MultiAgentEpisode::finalize`] turns it into its read-only form, or
//!    [`MultiAgentEpisode::cut`] first splits off a continuation which keeps the
//!    trailing steps as lookback context.
mod multi_agent;
mod single_agent;
mod summary;
pub use multi_agent::MultiAgentEpisode;
pub use single_agent::SingleAgentEpisode;
pub use summary::EpisodeSummary;
