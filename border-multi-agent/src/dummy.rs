//! Deterministic environment, module, transform and callbacks, used for tests.
use crate::{
    base::{
        AgentId, AgentMap, Callbacks, EnvToModule, EpisodeContext, Module, ModuleId, ModuleOutput,
        MultiAgentEnv, MultiAgentStep, SharedData,
    },
    connector::{DefaultEnvToModule, ModuleInput},
    episode::MultiAgentEpisode,
    error::ModuleBuildError,
    metrics::{MetricsLogger, Reduce},
    record::RecordValue,
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Configuration of [`TurnBasedEnv`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TurnBasedEnvConfig {
    /// Number of agents, named `a0`, `a1`, ...
    pub n_agents: usize,

    /// Environment steps per episode.
    pub episode_len: usize,

    /// If `true`, agents observe, and act, one at a time in turn. Otherwise all
    /// agents observe at every step.
    pub turn_based: bool,

    /// Fail once at this lifetime step count.
    pub fail_at_step: Option<usize>,
}

impl Default for TurnBasedEnvConfig {
    fn default() -> Self {
        Self {
            n_agents: 2,
            episode_len: 4,
            turn_based: false,
            fail_at_step: None,
        }
    }
}

impl TurnBasedEnvConfig {
    /// Sets the number of agents.
    pub fn n_agents(mut self, v: usize) -> Self {
        self.n_agents = v;
        self
    }

    /// Sets the episode length.
    pub fn episode_len(mut self, v: usize) -> Self {
        self.episode_len = v;
        self
    }

    /// Sets if agents take turns.
    pub fn turn_based(mut self, v: bool) -> Self {
        self.turn_based = v;
        self
    }

    /// Makes the step with the given lifetime count fail.
    pub fn fail_at_step(mut self, v: usize) -> Self {
        self.fail_at_step = Some(v);
        self
    }
}

/// An environment whose observations are the step counter of the episode.
///
/// Actions are `0` or `1`; an acting agent receives the reward `1 + action`.
/// The episode terminates for all agents after `episode_len` steps.
pub struct TurnBasedEnv {
    config: TurnBasedEnvConfig,
    rng: fastrand::Rng,
    t: usize,
    n_resets: usize,
    n_steps: usize,
    fail_at_step: Option<usize>,
    is_closed: bool,
}

impl TurnBasedEnv {
    fn agent_id(i: usize) -> AgentId {
        format!("a{}", i)
    }

    fn observers(&self) -> Vec<AgentId> {
        match self.config.turn_based {
            true => vec![Self::agent_id(self.t % self.config.n_agents)],
            false => (0..self.config.n_agents).map(Self::agent_id).collect(),
        }
    }

    fn observations(&self) -> AgentMap<i64> {
        self.observers()
            .into_iter()
            .map(|agent_id| (agent_id, self.t as i64))
            .collect()
    }

    /// Number of resets over the lifetime of the environment.
    pub fn n_resets(&self) -> usize {
        self.n_resets
    }

    /// Number of steps over the lifetime of the environment.
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }
}

impl MultiAgentEnv for TurnBasedEnv {
    type Config = TurnBasedEnvConfig;
    type Obs = i64;
    type Act = i64;
    type Info = ();

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            rng: fastrand::Rng::with_seed(seed as u64),
            t: 0,
            n_resets: 0,
            n_steps: 0,
            fail_at_step: config.fail_at_step,
            is_closed: false,
        })
    }

    fn reset(&mut self) -> Result<(AgentMap<i64>, AgentMap<()>)> {
        self.t = 0;
        self.n_resets += 1;
        Ok((self.observations(), AgentMap::new()))
    }

    fn step(&mut self, act: &AgentMap<i64>) -> Result<MultiAgentStep<Self>> {
        if self.fail_at_step == Some(self.n_steps + 1) {
            self.fail_at_step = None;
            return Err(anyhow!("Failure injected at step {}", self.n_steps + 1));
        }
        self.t += 1;
        self.n_steps += 1;

        let reward = act
            .iter()
            .map(|(agent_id, a)| (agent_id.clone(), 1.0 + *a as f32))
            .collect();
        let mut step = MultiAgentStep::new(self.observations(), reward);
        step.all_terminated = self.t >= self.config.episode_len;
        Ok(step)
    }

    fn action_space_sample(&mut self) -> AgentMap<i64> {
        (0..self.config.n_agents)
            .map(|i| (Self::agent_id(i), self.rng.i64(0..2)))
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.config.n_agents == 0 {
            return Err(anyhow!("TurnBasedEnv needs at least one agent"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.is_closed = true;
        Ok(())
    }
}

/// Configuration of [`ParityModule`].
#[derive(Clone, Debug, Default)]
pub struct ParityModuleConfig {
    /// Initial weight.
    pub bias: i64,

    /// If `true`, building fails with [`ModuleBuildError::NotImplemented`].
    pub unavailable: bool,
}

/// Weights of [`ParityModule`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ParityModuleState {
    /// Added to the observation before taking its parity.
    pub bias: i64,
}

/// A module acting with the parity of `observation + bias`.
///
/// Every output carries the observation as the extra output `"vf_preds"`.
pub struct ParityModule {
    bias: i64,
    module_ids: Vec<ModuleId>,
    n_exploration: usize,
    n_inference: usize,
    last_t: Option<usize>,
}

impl ParityModule {
    fn forward(&self, input: ModuleInput<i64>) -> ModuleOutput<i64> {
        let actions = input
            .agents()
            .map(|(agent_id, obs)| (agent_id.clone(), (obs + self.bias).rem_euclid(2)))
            .collect();
        let vf_preds = input
            .agents()
            .map(|(agent_id, obs)| (agent_id.clone(), RecordValue::Scalar(*obs as f32)))
            .collect();
        ModuleOutput::from_actions(actions).with_extra("vf_preds", vf_preds)
    }

    /// Number of exploration forward passes.
    pub fn n_exploration(&self) -> usize {
        self.n_exploration
    }

    /// Number of inference forward passes.
    pub fn n_inference(&self) -> usize {
        self.n_inference
    }

    /// `t` given to the last exploration forward pass.
    pub fn last_t(&self) -> Option<usize> {
        self.last_t
    }

    /// Modules served.
    pub fn module_ids(&self) -> &[ModuleId] {
        &self.module_ids
    }
}

impl Module<TurnBasedEnv> for ParityModule {
    type Config = ParityModuleConfig;
    type Input = ModuleInput<i64>;
    type State = ParityModuleState;

    fn build(config: &Self::Config, module_ids: &[ModuleId]) -> Result<Self, ModuleBuildError> {
        if config.unavailable {
            return Err(ModuleBuildError::NotImplemented);
        }
        Ok(Self {
            bias: config.bias,
            module_ids: module_ids.to_vec(),
            n_exploration: 0,
            n_inference: 0,
            last_t: None,
        })
    }

    fn forward_exploration(&mut self, input: Self::Input, t: usize) -> Result<ModuleOutput<i64>> {
        self.n_exploration += 1;
        self.last_t = Some(t);
        Ok(self.forward(input))
    }

    fn forward_inference(&mut self, input: Self::Input) -> Result<ModuleOutput<i64>> {
        self.n_inference += 1;
        Ok(self.forward(input))
    }

    fn get_state(&self) -> Self::State {
        ParityModuleState { bias: self.bias }
    }

    fn set_state(&mut self, state: Self::State) -> Result<()> {
        self.bias = state.bias;
        Ok(())
    }
}

/// A call of [`CountingEnvToModule`].
#[derive(Clone, Debug, PartialEq)]
pub struct EnvToModuleCall {
    /// Id of the episode.
    pub episode_id: String,

    /// `env_t` of the episode.
    pub env_t: usize,

    /// If the episode was done.
    pub is_done: bool,

    /// Number of agents in the produced input.
    pub n_agents: usize,
}

/// [`DefaultEnvToModule`] recording its calls.
#[derive(Clone, Debug, Default)]
pub struct CountingEnvToModule {
    calls: Vec<EnvToModuleCall>,
    state: u64,
}

impl CountingEnvToModule {
    /// The calls so far.
    pub fn calls(&self) -> &[EnvToModuleCall] {
        &self.calls
    }

    /// Calls on episodes that were done.
    pub fn n_terminal_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.is_done).count()
    }
}

impl EnvToModule<TurnBasedEnv, ParityModule> for CountingEnvToModule {
    type State = u64;

    fn call(
        &mut self,
        module: Option<&ParityModule>,
        episodes: &mut [MultiAgentEpisode<TurnBasedEnv>],
        explore: bool,
        shared_data: &mut SharedData,
    ) -> Result<ModuleInput<i64>> {
        let input = EnvToModule::<TurnBasedEnv, ParityModule>::call(
            &mut DefaultEnvToModule,
            module,
            episodes,
            explore,
            shared_data,
        )?;
        for episode in episodes.iter() {
            self.calls.push(EnvToModuleCall {
                episode_id: episode.id().clone(),
                env_t: episode.env_t(),
                is_done: episode.is_done(),
                n_agents: input.len(),
            });
        }
        Ok(input)
    }

    fn get_state(&self) -> Self::State {
        self.state
    }

    fn set_state(&mut self, state: Self::State) -> Result<()> {
        self.state = state;
        Ok(())
    }
}

/// Callbacks recording the names of the hooks invoked.
///
/// Also logs `"custom/episode_ends"` to the runner metrics at every episode end.
#[derive(Clone, Debug, Default)]
pub struct RecordingCallbacks {
    /// Names of the hooks, in invocation order.
    pub events: Vec<String>,
}

impl<M> Callbacks<TurnBasedEnv, M> for RecordingCallbacks {
    fn on_episode_created(&mut self, _ctx: EpisodeContext<'_, TurnBasedEnv, M>) {
        self.events.push("created".to_string());
    }

    fn on_episode_start(&mut self, ctx: EpisodeContext<'_, TurnBasedEnv, M>) {
        debug_assert!(ctx.episode.is_reset());
        self.events.push("start".to_string());
    }

    fn on_episode_step(&mut self, _ctx: EpisodeContext<'_, TurnBasedEnv, M>) {
        self.events.push("step".to_string());
    }

    fn on_episode_end(&mut self, ctx: EpisodeContext<'_, TurnBasedEnv, M>) {
        ctx.metrics.log_value(
            "custom/episode_ends",
            1.0,
            Reduce::Sum {
                clear_on_reduce: true,
            },
        );
        self.events.push("end".to_string());
    }

    fn on_environment_created(
        &mut self,
        _worker_index: usize,
        _metrics: &mut MetricsLogger,
        _env: &TurnBasedEnv,
    ) {
        self.events.push("env_created".to_string());
    }

    fn on_sample_end(
        &mut self,
        _worker_index: usize,
        _metrics: &mut MetricsLogger,
        samples: &[MultiAgentEpisode<TurnBasedEnv>],
    ) {
        self.events.push(format!("sample_end:{}", samples.len()));
    }
}
