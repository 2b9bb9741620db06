//! Errors in the library.
use crate::base::{AgentId, ModuleId};
use thiserror::Error;

/// Errors raised by [`MultiAgentEnvRunner`](crate::MultiAgentEnvRunner).
///
/// Most of these are configuration errors raised by [`build`] or on a sampling call.
/// [`NoEnv`](Self::NoEnv) is also raised after [`stop`], and
/// [`UnmappedAgent`](Self::UnmappedAgent) when an agent first appears in the middle
/// of an episode without a module mapped to it.
///
/// [`build`]: crate::MultiAgentEnvRunner::build
/// [`stop`]: crate::MultiAgentEnvRunner::stop
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No module is configured, so the setup is not a multi-agent one.
    #[error(
        "Cannot use MultiAgentEnvRunner if the setup is not multi-agent. \
         Add at least one module to `multi_agent.modules` in the config"
    )]
    NotMultiAgent,

    /// Both `num_timesteps` and `num_episodes` were given to `sample()`.
    #[error("Only one of `num_timesteps` or `num_episodes` may be provided")]
    BothTimestepsAndEpisodes,

    /// Actions were requested from the module, but the runner has none.
    #[error("No module available; only `random_actions` sampling is possible")]
    NoModule,

    /// The environment has not been created.
    #[error("No environment available; call `make_env()` first")]
    NoEnv,

    /// The agent-to-module mapping refers to a module that is not configured.
    #[error("Unknown module: {0}")]
    UnknownModule(ModuleId),

    /// No module could be resolved for the given agent.
    #[error("No module is mapped to agent {0}")]
    UnmappedAgent(AgentId),
}

/// Errors on episode records.
#[derive(Error, Debug)]
pub enum EpisodeError {
    /// The episode was finalized and is read-only.
    #[error("Episode {0} is finalized and cannot be mutated")]
    Finalized(String),

    /// The episode is done and cannot receive further steps.
    #[error("Episode {0} is done and cannot receive further steps")]
    Done(String),

    /// A step was added before the initial observations.
    #[error("Episode {0} has not been reset")]
    NotReset(String),

    /// An agent received an observation without having acted.
    #[error("Agent {0} received an observation without a preceding action")]
    UnexpectedObservation(AgentId),

    /// Validation of the episode failed.
    #[error("Invalid episode: {0}")]
    Invalid(String),
}

/// Errors on [`Record`](crate::record::Record) access.
#[derive(Error, Debug)]
pub enum RecordError {
    /// Record key error.
    #[error("Record key error: {0}")]
    KeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    ValueTypeError(String),
}

/// Errors on building a [`Module`](crate::Module).
#[derive(Error, Debug)]
pub enum ModuleBuildError {
    /// The module cannot be built for this setup, e.g., for pure random-action sampling.
    ///
    /// The runner treats this as "no module" rather than as a failure.
    #[error("Module is not implemented for this setup")]
    NotImplemented,

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
