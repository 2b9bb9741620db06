#![warn(missing_docs)]
//! Sampling of multi-agent reinforcement learning environments.
//!
//! [`MultiAgentEnvRunner`] drives a [`MultiAgentEnv`] with a [`Module`] and returns
//! the collected experience as [`MultiAgentEpisode`]s, either a fixed number of
//! timesteps at a time ([`MultiAgentEnvRunner::sample_timesteps`]) or a fixed number of
//! complete episodes ([`MultiAgentEnvRunner::sample_episodes`]). It also aggregates
//! episode statistics across chunk boundaries and exchanges module weights and
//! transform states with a learner.
//!
//! ```rust
//! use border_multi_agent::{
//!     connector::{DefaultEnvToModule, PassThroughModuleToEnv},
//!     dummy::{ParityModule, ParityModuleConfig, TurnBasedEnv, TurnBasedEnvConfig},
//!     metrics::EPISODE_LEN_MEAN,
//!     EnvRunnerConfig, MultiAgentConfig, MultiAgentEnvRunner, NullCallbacks, SampleArgs,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EnvRunnerConfig::default()
//!     .multi_agent(MultiAgentConfig::default().module("shared"));
//! let mut runner = MultiAgentEnvRunner::<TurnBasedEnv, ParityModule, _, _, _>::build(
//!     config,
//!     TurnBasedEnvConfig::default().episode_len(4),
//!     &ParityModuleConfig::default(),
//!     DefaultEnvToModule,
//!     PassThroughModuleToEnv,
//!     NullCallbacks,
//!     0,
//! )?;
//!
//! let episodes = runner.sample(SampleArgs::episodes(3))?;
//! assert_eq!(episodes.len(), 3);
//! assert!(episodes.iter().all(|ep| ep.is_done() && ep.len() == 4));
//!
//! let metrics = runner.get_metrics();
//! assert_eq!(metrics.get_scalar(EPISODE_LEN_MEAN)?, 4.0);
//! # Ok(())
//! # }
//! ```
pub mod connector;
pub mod dummy;
pub mod episode;
pub mod error;
pub mod metrics;
pub mod record;

mod base;
pub use base::{
    Act, AgentId, AgentMap, Callbacks, EnvToModule, EpisodeContext, EpisodeId, ExtraOutputs,
    Info, Module, ModuleId, ModuleOutput, ModuleToEnv, MultiAgentEnv, MultiAgentStep,
    NullCallbacks, Obs, SharedData,
};
pub use episode::{EpisodeSummary, MultiAgentEpisode, SingleAgentEpisode};

mod runner;
pub use runner::{
    AgentToModuleMapping, BatchMode, EnvRunnerConfig, MultiAgentConfig, MultiAgentEnvRunner,
    RolloutFragmentLength, RunnerState, SampleArgs, StateComponent,
};
