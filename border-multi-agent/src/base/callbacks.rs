//! Lifecycle notifications of a runner.
use super::MultiAgentEnv;
use crate::{episode::MultiAgentEpisode, metrics::MetricsLogger};

/// Objects passed to the episode hooks of [`Callbacks`].
pub struct EpisodeContext<'a, E: MultiAgentEnv, M> {
    /// The episode the notification is about.
    pub episode: &'a MultiAgentEpisode<E>,

    /// Index of the runner that fired the notification.
    pub worker_index: usize,

    /// Metrics of the runner. Values logged here show up in the next metrics pull.
    pub metrics: &'a mut MetricsLogger,

    /// The environment.
    pub env: &'a E,

    /// The module, if the runner has one.
    pub module: Option<&'a M>,
}

/// Hooks invoked by [`MultiAgentEnvRunner`](crate::MultiAgentEnvRunner) at lifecycle
/// events. Return values are not consumed; all methods default to no-ops.
#[allow(unused_variables)]
pub trait Callbacks<E: MultiAgentEnv, M> {
    /// A new episode object was created, before the environment reset.
    fn on_episode_created(&mut self, ctx: EpisodeContext<'_, E, M>) {}

    /// The initial observations were added to the episode.
    fn on_episode_start(&mut self, ctx: EpisodeContext<'_, E, M>) {}

    /// A step was added to the episode.
    fn on_episode_step(&mut self, ctx: EpisodeContext<'_, E, M>) {}

    /// The episode is done. Called after the terminal observation went through the
    /// env-to-module transform and before the episode is finalized.
    fn on_episode_end(&mut self, ctx: EpisodeContext<'_, E, M>) {}

    /// The environment was (re-)created.
    fn on_environment_created(&mut self, worker_index: usize, metrics: &mut MetricsLogger, env: &E) {}

    /// A call to `sample()` is about to return `samples`.
    fn on_sample_end(
        &mut self,
        worker_index: usize,
        metrics: &mut MetricsLogger,
        samples: &[MultiAgentEpisode<E>],
    ) {
    }
}

/// Callbacks doing nothing.
#[derive(Clone, Debug, Default)]
pub struct NullCallbacks;

impl<E: MultiAgentEnv, M> Callbacks<E, M> for NullCallbacks {}
