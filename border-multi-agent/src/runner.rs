//! Sampling of multi-agent episodes.
mod config;
mod state;
use crate::{
    base::{
        AgentId, Callbacks, EnvToModule, EpisodeContext, Module, ModuleId, ModuleOutput,
        ModuleToEnv, MultiAgentEnv, NullCallbacks, SharedData,
    },
    episode::{EpisodeSummary, MultiAgentEpisode},
    error::{ModuleBuildError, RunnerError},
    metrics::*,
    record::Record,
};
use anyhow::Result;
pub use config::{AgentToModuleMapping, BatchMode, EnvRunnerConfig, MultiAgentConfig, RolloutFragmentLength};
use log::{debug, error, info, warn};
pub use state::{RunnerState, StateComponent};
use std::{collections::HashMap, sync::Arc};

/// Invokes an episode hook of the callbacks, borrowing the fields of the runner
/// separately from the episode.
macro_rules! episode_hook {
    ($runner:ident, $hook:ident, $episode:expr) => {
        if let Some(env) = $runner.env.as_ref() {
            $runner.callbacks.$hook(EpisodeContext {
                episode: $episode,
                worker_index: $runner.worker_index,
                metrics: &mut $runner.metrics,
                env,
                module: $runner.module.as_ref(),
            });
        }
    };
}

/// Arguments of [`MultiAgentEnvRunner::sample`].
///
/// At most one of `num_timesteps` and `num_episodes` may be set. If neither is set,
/// the batch mode of the config decides.
#[derive(Clone, Debug, Default)]
pub struct SampleArgs {
    /// Number of environment steps to sample.
    pub num_timesteps: Option<usize>,

    /// Number of complete episodes to sample.
    pub num_episodes: Option<usize>,

    /// Overrides the `explore` flag of the config.
    pub explore: Option<bool>,

    /// Sample actions from the action spaces instead of the module.
    pub random_actions: bool,

    /// Start a new episode even if one is in flight.
    pub force_reset: bool,
}

impl SampleArgs {
    /// Samples `n` environment steps.
    pub fn timesteps(n: usize) -> Self {
        Self {
            num_timesteps: Some(n),
            ..Default::default()
        }
    }

    /// Samples `n` complete episodes.
    pub fn episodes(n: usize) -> Self {
        Self {
            num_episodes: Some(n),
            ..Default::default()
        }
    }

    /// Sets the exploration flag.
    pub fn explore(mut self, v: bool) -> Self {
        self.explore = Some(v);
        self
    }

    /// Sets if actions are sampled randomly.
    pub fn random_actions(mut self, v: bool) -> Self {
        self.random_actions = v;
        self
    }

    /// Sets if the in-flight episode is discarded.
    pub fn force_reset(mut self, v: bool) -> Self {
        self.force_reset = v;
        self
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Samples episodes from a [`MultiAgentEnv`] with a [`Module`].
///
/// # Sampling loop
///
/// At every environment step, the runner
///
/// 1. builds the module input from the in-flight episode with [`EnvToModule`],
/// 2. runs the forward pass of the [`Module`], in exploration or inference mode,
/// 3. turns the module output into actions with [`ModuleToEnv`],
/// 4. steps the environment with the actions of the agents eligible to act,
/// 5. adds the step to the episode and updates the step counters.
///
/// ```mermaid
/// graph LR
///     A[MultiAgentEpisode]-->|EnvToModule|B[Module]
///     B -->|ModuleToEnv|C[MultiAgentEnv]
///     C -->|"MultiAgentStep&lt;E&gt;"|A
/// ```
///
/// When an episode is done, its terminal observation goes through [`EnvToModule`]
/// once more, the episode is finalized and a new one is started.
///
/// # Chunking
///
/// [`sample_timesteps`](Self::sample_timesteps) returns after a fixed number of
/// steps. The in-flight episode is then cut: its steps so far are returned as a
/// finalized chunk and a continuation, sharing the episode id, is kept for the next
/// call. The module input of the continuation is computed before the cut and reused
/// by the first step of the next call, so every observation passes [`EnvToModule`]
/// exactly once.
///
/// Statistics of chunks are kept until the episode completes, so that metrics are
/// reported per whole episode; see [`get_metrics`](Self::get_metrics).
pub struct MultiAgentEnvRunner<E, M, P, Q, C = NullCallbacks>
where
    E: MultiAgentEnv,
    M: Module<E>,
    P: EnvToModule<E, M>,
    Q: ModuleToEnv<E, M>,
    C: Callbacks<E, M>,
{
    config: EnvRunnerConfig,

    /// Index of this runner; 0 denotes the local runner.
    worker_index: usize,

    env_config: E::Config,
    env: Option<E>,
    module: Option<M>,
    env_to_module: P,
    module_to_env: Q,
    callbacks: C,
    metrics: MetricsLogger,
    agent_to_module_mapping: Arc<AgentToModuleMapping>,
    shared_data: SharedData,

    /// In-flight episode of timestep sampling.
    episode: Option<MultiAgentEpisode<E>>,

    /// Module input computed on the in-flight episode at the end of the last call.
    cached_to_module: Option<M::Input>,

    needs_initial_reset: bool,

    /// Version of the module weights.
    weights_seq_no: u64,

    /// Summaries of the last chunks of completed episodes, until the next metrics pull.
    done_episodes_for_metrics: Vec<EpisodeSummary>,

    /// Summaries of the returned chunks of episodes still in flight.
    ongoing_episodes_for_metrics: HashMap<String, Vec<EpisodeSummary>>,
}

impl<E, M, P, Q, C> MultiAgentEnvRunner<E, M, P, Q, C>
where
    E: MultiAgentEnv,
    M: Module<E>,
    P: EnvToModule<E, M>,
    Q: ModuleToEnv<E, M>,
    C: Callbacks<E, M>,
{
    /// Builds a runner with its environment and module.
    ///
    /// If the module reports [`ModuleBuildError::NotImplemented`], the runner is built
    /// without a module and can only sample random actions.
    pub fn build(
        config: EnvRunnerConfig,
        env_config: E::Config,
        module_config: &M::Config,
        env_to_module: P,
        module_to_env: Q,
        callbacks: C,
        worker_index: usize,
    ) -> Result<Self> {
        if !config.is_multi_agent() {
            return Err(RunnerError::NotMultiAgent.into());
        }
        let agent_to_module_mapping = Arc::new(config.multi_agent.mapping()?);

        let mut runner = Self {
            env_config,
            env: None,
            module: None,
            env_to_module,
            module_to_env,
            callbacks,
            metrics: MetricsLogger::new(),
            shared_data: SharedData::new(agent_to_module_mapping.clone()),
            agent_to_module_mapping,
            episode: None,
            cached_to_module: None,
            needs_initial_reset: true,
            weights_seq_no: 0,
            done_episodes_for_metrics: vec![],
            ongoing_episodes_for_metrics: HashMap::new(),
            worker_index,
            config,
        };
        runner.make_env()?;

        runner.module = match M::build(module_config, &runner.config.multi_agent.modules) {
            Ok(module) => Some(module),
            Err(ModuleBuildError::NotImplemented) => {
                info!(
                    "No module for runner {}; only random actions can be sampled",
                    worker_index
                );
                None
            }
            Err(ModuleBuildError::Other(e)) => return Err(e),
        };

        info!("Built MultiAgentEnvRunner {}", worker_index);
        Ok(runner)
    }

    /// (Re-)creates the environment.
    ///
    /// The existing environment is closed first; a failure to close it is only
    /// logged. The next timestep sampling starts with a reset.
    pub fn make_env(&mut self) -> Result<()> {
        if let Some(mut env) = self.env.take() {
            if let Err(e) = env.close() {
                warn!("Failed to close the existing environment: {}", e);
            }
        }
        self.episode = None;
        self.cached_to_module = None;

        let seed = self.config.seed + self.worker_index as i64;
        let env = match E::build(&self.env_config, seed) {
            Ok(env) => env,
            Err(e) => {
                error!("Failed to build the environment: {}", e);
                return Err(e);
            }
        };
        if let Err(e) = env.check() {
            error!("Environment check failed: {}", e);
        }

        self.callbacks
            .on_environment_created(self.worker_index, &mut self.metrics, &env);
        self.env = Some(env);
        self.needs_initial_reset = true;
        Ok(())
    }

    /// Samples episodes or episode chunks.
    pub fn sample(&mut self, args: SampleArgs) -> Result<Vec<MultiAgentEpisode<E>>> {
        if args.num_timesteps.is_some() && args.num_episodes.is_some() {
            return Err(RunnerError::BothTimestepsAndEpisodes.into());
        }
        let explore = args.explore.unwrap_or(self.config.explore);

        let samples = match (args.num_timesteps, args.num_episodes) {
            (Some(n), _) => {
                self.sample_timesteps(n, explore, args.random_actions, args.force_reset)?
            }
            (None, Some(n)) => self.sample_episodes(n, explore, args.random_actions)?,
            (None, None) => match self.config.batch_mode {
                BatchMode::TruncateEpisodes => {
                    let n = self.config.get_rollout_fragment_length(self.worker_index);
                    self.sample_timesteps(n, explore, args.random_actions, args.force_reset)?
                }
                BatchMode::CompleteEpisodes => {
                    self.sample_episodes(1, explore, args.random_actions)?
                }
            },
        };

        self.callbacks
            .on_sample_end(self.worker_index, &mut self.metrics, &samples);
        Ok(samples)
    }

    fn check_can_sample(&self, random_actions: bool) -> Result<()> {
        if self.env.is_none() {
            return Err(RunnerError::NoEnv.into());
        }
        if !random_actions && self.module.is_none() {
            return Err(RunnerError::NoModule.into());
        }
        Ok(())
    }

    /// Samples exactly `num_timesteps` environment steps.
    ///
    /// Returns the episodes completed in this call followed by the chunk of the
    /// in-flight episode, if it has at least one step in this call. The in-flight
    /// episode continues with the next call unless `force_reset` is `true`.
    ///
    /// If an error is returned, the in-flight episode is discarded.
    pub fn sample_timesteps(
        &mut self,
        num_timesteps: usize,
        explore: bool,
        random_actions: bool,
        force_reset: bool,
    ) -> Result<Vec<MultiAgentEpisode<E>>> {
        self.check_can_sample(random_actions)?;

        let mut episode = match self.episode.take() {
            Some(episode) if !force_reset && !self.needs_initial_reset => episode,
            _ => {
                self.ongoing_episodes_for_metrics.clear();
                self.shared_data = SharedData::new(self.agent_to_module_mapping.clone());
                let episode = self.reset_episode()?;
                self.needs_initial_reset = false;
                episode
            }
        };

        let mut done_episodes = vec![];
        let mut ts = 0;
        while ts < num_timesteps {
            self.step_episode(&mut episode, explore, random_actions)?;
            ts += 1;

            if episode.is_done() {
                done_episodes.push(self.finish_episode(episode, explore)?);
                episode = self.reset_episode()?;
            }
        }

        // Module input of the next step, reused by the next call.
        if self.module.is_some() {
            let to_module = self.env_to_module.call(
                self.module.as_ref(),
                std::slice::from_mut(&mut episode),
                explore,
                &mut self.shared_data,
            )?;
            self.cached_to_module = Some(to_module);
        }

        let continuation = episode.cut(self.config.episode_lookback_horizon);
        if !episode.is_empty() {
            episode.validate()?;
            let chunk = episode.finalize(true);
            self.ongoing_episodes_for_metrics
                .entry(chunk.id().clone())
                .or_default()
                .push(chunk.summary());
            done_episodes.push(chunk);
        }
        self.episode = Some(continuation);

        debug!(
            "Runner {} sampled {} timesteps in {} episodes",
            self.worker_index,
            num_timesteps,
            done_episodes.len()
        );
        Ok(done_episodes)
    }

    /// Samples exactly `num_episodes` complete episodes.
    ///
    /// Always starts with a new episode and discards the in-flight episode of
    /// timestep sampling.
    pub fn sample_episodes(
        &mut self,
        num_episodes: usize,
        explore: bool,
        random_actions: bool,
    ) -> Result<Vec<MultiAgentEpisode<E>>> {
        self.check_can_sample(random_actions)?;
        self.needs_initial_reset = true;
        self.episode = None;

        let mut done_episodes = vec![];
        if num_episodes == 0 {
            return Ok(done_episodes);
        }

        self.shared_data = SharedData::new(self.agent_to_module_mapping.clone());
        let mut episode = self.reset_episode()?;
        loop {
            self.step_episode(&mut episode, explore, random_actions)?;

            if episode.is_done() {
                done_episodes.push(self.finish_episode(episode, explore)?);
                if done_episodes.len() == num_episodes {
                    break;
                }
                episode = self.reset_episode()?;
            }
        }

        debug!(
            "Runner {} sampled {} episodes",
            self.worker_index,
            done_episodes.len()
        );
        Ok(done_episodes)
    }

    /// Resets the environment into a new episode.
    fn reset_episode(&mut self) -> Result<MultiAgentEpisode<E>> {
        let mut episode = MultiAgentEpisode::new(self.agent_to_module_mapping.clone());
        episode_hook!(self, on_episode_created, &episode);

        let env = self.env.as_mut().ok_or(RunnerError::NoEnv)?;
        let (obs, infos) = env.reset()?;
        self.cached_to_module = None;
        episode.add_env_reset(obs, infos)?;
        debug!("Runner {} started episode {}", self.worker_index, episode.id());

        episode_hook!(self, on_episode_start, &episode);
        Ok(episode)
    }

    /// Computes actions, steps the environment and records the step.
    fn step_episode(
        &mut self,
        episode: &mut MultiAgentEpisode<E>,
        explore: bool,
        random_actions: bool,
    ) -> Result<()> {
        let to_env = if random_actions {
            let env = self.env.as_mut().ok_or(RunnerError::NoEnv)?;
            let agents_to_act = episode.get_agents_to_act();
            let actions = env
                .action_space_sample()
                .into_iter()
                .filter(|(agent_id, _)| agents_to_act.contains(agent_id))
                .collect();
            ModuleOutput::from_actions(actions)
        } else {
            let to_module = match self.cached_to_module.take() {
                Some(to_module) => to_module,
                None => self.env_to_module.call(
                    self.module.as_ref(),
                    std::slice::from_mut(episode),
                    explore,
                    &mut self.shared_data,
                )?,
            };
            let t = self.num_env_steps_sampled_lifetime();
            let module = self.module.as_mut().ok_or(RunnerError::NoModule)?;
            let output = match explore {
                true => module.forward_exploration(to_module, t)?,
                false => module.forward_inference(to_module)?,
            };
            self.module_to_env.call(
                self.module.as_ref(),
                output,
                std::slice::from_mut(episode),
                explore,
                &mut self.shared_data,
            )?
        };

        let (actions, actions_for_env, extra_model_outputs) = to_env.into_parts();
        let env = self.env.as_mut().ok_or(RunnerError::NoEnv)?;
        let step = env.step(&actions_for_env)?;

        let observed = step
            .obs
            .keys()
            .map(|agent_id| (agent_id.clone(), episode.module_for(agent_id)))
            .collect::<Vec<_>>();
        episode.add_env_step(step, actions, extra_model_outputs)?;
        self.increase_sampled_metrics(&observed);

        episode_hook!(self, on_episode_step, &*episode);
        Ok(())
    }

    /// Runs the terminal observation through the env-to-module transform, then
    /// finalizes the episode.
    fn finish_episode(
        &mut self,
        mut episode: MultiAgentEpisode<E>,
        explore: bool,
    ) -> Result<MultiAgentEpisode<E>> {
        if self.module.is_some() {
            self.env_to_module.call(
                self.module.as_ref(),
                std::slice::from_mut(&mut episode),
                explore,
                &mut self.shared_data,
            )?;
        }
        episode_hook!(self, on_episode_end, &episode);

        let episode = episode.finalize(true);
        debug!(
            "Episode {} done: env_t = {}, return = {}",
            episode.id(),
            episode.env_t(),
            episode.get_return()
        );
        self.done_episodes_for_metrics.push(episode.summary());
        Ok(episode)
    }

    fn increase_sampled_metrics(&mut self, observed: &[(AgentId, Option<ModuleId>)]) {
        let per_call = Reduce::Sum {
            clear_on_reduce: true,
        };
        let lifetime = Reduce::Sum {
            clear_on_reduce: false,
        };
        let agents = || observed.iter().map(|(agent_id, _)| (agent_id, 1.0));
        let modules = || {
            observed
                .iter()
                .filter_map(|(_, module_id)| module_id.as_ref().map(|m| (m, 1.0)))
        };

        self.metrics.log_value(NUM_ENV_STEPS_SAMPLED, 1.0, per_call);
        self.metrics
            .log_value(NUM_ENV_STEPS_SAMPLED_LIFETIME, 1.0, lifetime);
        self.metrics
            .log_dict(NUM_AGENT_STEPS_SAMPLED, agents(), per_call);
        self.metrics
            .log_dict(NUM_AGENT_STEPS_SAMPLED_LIFETIME, agents(), lifetime);
        self.metrics
            .log_dict(NUM_MODULE_STEPS_SAMPLED, modules(), per_call);
        self.metrics
            .log_dict(NUM_MODULE_STEPS_SAMPLED_LIFETIME, modules(), lifetime);
    }

    fn log_episode_metrics(&mut self, summary: &EpisodeSummary) {
        let window = self.config.metrics_num_episodes_for_smoothing;
        let mean = Reduce::Mean { window };
        let len = summary.len as f64;
        let ret = summary.ret as f64;

        self.metrics.log_value(EPISODE_LEN_MEAN, len, mean);
        self.metrics.log_value(EPISODE_RETURN_MEAN, ret, mean);
        self.metrics
            .log_value(EPISODE_DURATION_SEC_MEAN, summary.duration_s, mean);
        self.metrics.log_dict(
            AGENT_EPISODE_RETURNS_MEAN,
            summary.agent_returns.iter().map(|(a, r)| (a, *r as f64)),
            mean,
        );
        self.metrics.log_dict(
            MODULE_EPISODE_RETURNS_MEAN,
            summary.module_returns.iter().map(|(m, r)| (m, *r as f64)),
            mean,
        );
        self.metrics.log_dict(
            AGENT_STEPS,
            summary.agent_steps.iter().map(|(a, n)| (a, *n as f64)),
            mean,
        );

        self.metrics
            .log_value(EPISODE_LEN_MIN, len, Reduce::Min { window });
        self.metrics
            .log_value(EPISODE_RETURN_MIN, ret, Reduce::Min { window });
        self.metrics
            .log_value(EPISODE_LEN_MAX, len, Reduce::Max { window });
        self.metrics
            .log_value(EPISODE_RETURN_MAX, ret, Reduce::Max { window });
    }

    /// Reduces the metrics collected since the last call.
    ///
    /// Every episode completed since the last call contributes one entry to the
    /// episode statistics, with the chunks returned by earlier calls folded in.
    /// Chunks of episodes still in flight are kept for a later call.
    pub fn get_metrics(&mut self) -> Record {
        let done_episodes = std::mem::take(&mut self.done_episodes_for_metrics);
        let num_episodes = done_episodes.len();

        for mut summary in done_episodes.into_iter() {
            debug_assert!(summary.is_done);
            if let Some(chunks) = self.ongoing_episodes_for_metrics.remove(&summary.id) {
                for chunk in chunks.iter() {
                    summary.absorb(chunk);
                }
            }
            self.log_episode_metrics(&summary);
        }

        self.metrics.log_value(
            NUM_EPISODES,
            num_episodes as f64,
            Reduce::Sum {
                clear_on_reduce: true,
            },
        );
        self.metrics.reduce()
    }

    /// Returns the selected components of the runner state. An empty slice selects
    /// all of them.
    pub fn export_state(
        &self,
        components: &[StateComponent],
    ) -> RunnerState<M::State, P::State, Q::State> {
        let selected = |c: StateComponent| components.is_empty() || components.contains(&c);

        RunnerState {
            weights_seq_no: self.weights_seq_no,
            num_env_steps_sampled_lifetime: Some(self.num_env_steps_sampled_lifetime()),
            module: match selected(StateComponent::Module) {
                true => self.module.as_ref().map(|m| m.get_state()),
                false => None,
            },
            env_to_module: match selected(StateComponent::EnvToModule) {
                true => Some(self.env_to_module.get_state()),
                false => None,
            },
            module_to_env: match selected(StateComponent::ModuleToEnv) {
                true => Some(self.module_to_env.get_state()),
                false => None,
            },
        }
    }

    /// Applies a runner state.
    ///
    /// Transform states are always applied. Module weights are applied if their
    /// version is `0` or newer than the local one; a nonzero version then becomes
    /// the local one. A lifetime step count is added to the local count.
    pub fn apply_state(&mut self, state: RunnerState<M::State, P::State, Q::State>) -> Result<()> {
        if let Some(s) = state.env_to_module {
            self.env_to_module.set_state(s)?;
        }
        if let Some(s) = state.module_to_env {
            self.module_to_env.set_state(s)?;
        }

        if let Some(weights) = state.module {
            let seq_no = state.weights_seq_no;
            if seq_no == 0 || self.weights_seq_no < seq_no {
                match self.module.as_mut() {
                    Some(module) => {
                        module.set_state(weights)?;
                        debug!(
                            "Runner {} applied weights with version {}",
                            self.worker_index, seq_no
                        );
                    }
                    None => warn!(
                        "Runner {} has no module to apply weights to",
                        self.worker_index
                    ),
                }
            } else {
                debug!(
                    "Runner {} skipped weights with version {} (local version {})",
                    self.worker_index, seq_no, self.weights_seq_no
                );
            }
            if seq_no > 0 {
                self.weights_seq_no = seq_no;
            }
            self.metrics.set_value(
                WEIGHTS_SEQ_NO,
                self.weights_seq_no as f64,
                Reduce::Max { window: 1 },
            );
        }

        if let Some(n) = state.num_env_steps_sampled_lifetime {
            self.metrics.log_value(
                NUM_ENV_STEPS_SAMPLED_LIFETIME,
                n as f64,
                Reduce::Sum {
                    clear_on_reduce: false,
                },
            );
        }
        Ok(())
    }

    /// Applies module weights with the given version.
    pub fn set_weights(&mut self, weights: M::State, weights_seq_no: u64) -> Result<()> {
        self.apply_state(RunnerState::from_weights(weights, weights_seq_no))
    }

    /// Closes the environment.
    pub fn stop(&mut self) -> Result<()> {
        self.episode = None;
        self.cached_to_module = None;
        if let Some(mut env) = self.env.take() {
            env.close()?;
            info!("Runner {} stopped", self.worker_index);
        }
        Ok(())
    }

    /// Checks that the runner has an environment and a module.
    pub fn assert_healthy(&self) -> Result<()> {
        if self.env.is_none() {
            return Err(RunnerError::NoEnv.into());
        }
        if self.module.is_none() {
            return Err(RunnerError::NoModule.into());
        }
        Ok(())
    }

    /// Environment steps sampled over the lifetime of the runner.
    pub fn num_env_steps_sampled_lifetime(&self) -> usize {
        self.metrics
            .peek(NUM_ENV_STEPS_SAMPLED_LIFETIME)
            .unwrap_or(0.0) as usize
    }

    /// The configuration.
    pub fn config(&self) -> &EnvRunnerConfig {
        &self.config
    }

    /// Index of this runner.
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// Version of the module weights.
    pub fn weights_seq_no(&self) -> u64 {
        self.weights_seq_no
    }

    /// The environment.
    pub fn env(&self) -> Option<&E> {
        self.env.as_ref()
    }

    /// The module.
    pub fn module(&self) -> Option<&M> {
        self.module.as_ref()
    }

    /// The env-to-module transform.
    pub fn env_to_module(&self) -> &P {
        &self.env_to_module
    }

    /// The module-to-env transform.
    pub fn module_to_env(&self) -> &Q {
        &self.module_to_env
    }

    /// The callbacks.
    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    /// The metrics, before reduction.
    pub fn metrics(&self) -> &MetricsLogger {
        &self.metrics
    }

    /// The continuation of the in-flight episode, if timestep sampling is in progress.
    pub fn episode(&self) -> Option<&MultiAgentEpisode<E>> {
        self.episode.as_ref()
    }
}
