//! Configuration of [`MultiAgentEnvRunner`](super::MultiAgentEnvRunner).
use crate::{
    base::{AgentId, ModuleId},
    error::RunnerError,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How `sample()` decides the amount of data when neither a number of timesteps
/// nor a number of episodes is given.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum BatchMode {
    /// Sample `rollout_fragment_length` timesteps, cutting episodes as needed.
    TruncateEpisodes,

    /// Sample one complete episode.
    CompleteEpisodes,
}

/// Number of timesteps sampled per call in [`BatchMode::TruncateEpisodes`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum RolloutFragmentLength {
    /// Derived from `train_batch_size` and `num_env_runners`.
    Auto,

    /// A fixed number of timesteps.
    Fixed(usize),
}

/// Agents, modules and the assignment of agents to modules.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct MultiAgentConfig {
    /// Ids of the modules.
    pub modules: Vec<ModuleId>,

    /// Explicit assignment of agents to modules.
    pub policy_mapping: BTreeMap<AgentId, ModuleId>,

    /// Module of agents without an explicit assignment.
    pub default_module: Option<ModuleId>,
}

impl MultiAgentConfig {
    /// Adds a module.
    pub fn module(mut self, module_id: impl Into<ModuleId>) -> Self {
        self.modules.push(module_id.into());
        self
    }

    /// Assigns an agent to a module.
    pub fn map_agent(mut self, agent_id: impl Into<AgentId>, module_id: impl Into<ModuleId>) -> Self {
        self.policy_mapping.insert(agent_id.into(), module_id.into());
        self
    }

    /// Sets the module of agents without an explicit assignment.
    pub fn default_module(mut self, module_id: impl Into<ModuleId>) -> Self {
        self.default_module = Some(module_id.into());
        self
    }

    /// Builds the agent-to-module mapping, checking that it only refers to
    /// configured modules.
    pub fn mapping(&self) -> Result<AgentToModuleMapping, RunnerError> {
        let known = |m: &ModuleId| -> Result<(), RunnerError> {
            match self.modules.contains(m) {
                true => Ok(()),
                false => Err(RunnerError::UnknownModule(m.clone())),
            }
        };
        for module_id in self.policy_mapping.values() {
            known(module_id)?;
        }
        if let Some(module_id) = &self.default_module {
            known(module_id)?;
        }

        Ok(AgentToModuleMapping {
            policy_mapping: self.policy_mapping.clone(),
            fallback: match (&self.default_module, self.modules.as_slice()) {
                (Some(m), _) => Some(m.clone()),
                (None, [m]) => Some(m.clone()),
                _ => None,
            },
        })
    }
}

/// Assigns agents to modules.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentToModuleMapping {
    policy_mapping: BTreeMap<AgentId, ModuleId>,
    fallback: Option<ModuleId>,
}

impl AgentToModuleMapping {
    /// Returns the module of the agent: its explicit assignment, the default module,
    /// or the only configured module.
    pub fn module_for(&self, agent_id: &str) -> Result<ModuleId, RunnerError> {
        self.policy_mapping
            .get(agent_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| RunnerError::UnmappedAgent(agent_id.to_string()))
    }
}

/// Configuration of [`MultiAgentEnvRunner`](super::MultiAgentEnvRunner).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EnvRunnerConfig {
    /// Use the exploration forward pass of the module by default.
    pub explore: bool,

    /// How much to sample per call if not specified.
    pub batch_mode: BatchMode,

    /// Timesteps per call in [`BatchMode::TruncateEpisodes`].
    pub rollout_fragment_length: RolloutFragmentLength,

    /// Total timesteps per training batch, over all runners.
    pub train_batch_size: usize,

    /// Number of runners sampling in parallel.
    pub num_env_runners: usize,

    /// Steps kept as context in the continuation of a cut episode.
    pub episode_lookback_horizon: usize,

    /// Window of the episode statistics.
    pub metrics_num_episodes_for_smoothing: usize,

    /// Random seed of the environment. The runner adds its worker index.
    pub seed: i64,

    /// Agents and modules.
    pub multi_agent: MultiAgentConfig,
}

impl Default for EnvRunnerConfig {
    fn default() -> Self {
        Self {
            explore: true,
            batch_mode: BatchMode::TruncateEpisodes,
            rollout_fragment_length: RolloutFragmentLength::Fixed(200),
            train_batch_size: 4000,
            num_env_runners: 0,
            episode_lookback_horizon: 1,
            metrics_num_episodes_for_smoothing: 100,
            seed: 42,
            multi_agent: MultiAgentConfig::default(),
        }
    }
}

impl EnvRunnerConfig {
    /// Sets if actions are computed in exploration mode by default.
    pub fn explore(mut self, v: bool) -> Self {
        self.explore = v;
        self
    }

    /// Sets the batch mode.
    pub fn batch_mode(mut self, v: BatchMode) -> Self {
        self.batch_mode = v;
        self
    }

    /// Sets the rollout fragment length.
    pub fn rollout_fragment_length(mut self, v: RolloutFragmentLength) -> Self {
        self.rollout_fragment_length = v;
        self
    }

    /// Sets the train batch size.
    pub fn train_batch_size(mut self, v: usize) -> Self {
        self.train_batch_size = v;
        self
    }

    /// Sets the number of runners.
    pub fn num_env_runners(mut self, v: usize) -> Self {
        self.num_env_runners = v;
        self
    }

    /// Sets the lookback horizon of episode continuations.
    pub fn episode_lookback_horizon(mut self, v: usize) -> Self {
        self.episode_lookback_horizon = v;
        self
    }

    /// Sets the smoothing window of the episode statistics.
    pub fn metrics_num_episodes_for_smoothing(mut self, v: usize) -> Self {
        self.metrics_num_episodes_for_smoothing = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Sets agents and modules.
    pub fn multi_agent(mut self, v: MultiAgentConfig) -> Self {
        self.multi_agent = v;
        self
    }

    /// Returns `true` if at least one module is configured.
    pub fn is_multi_agent(&self) -> bool {
        !self.multi_agent.modules.is_empty()
    }

    /// Returns the number of timesteps the runner with `worker_index` samples per call.
    ///
    /// With [`RolloutFragmentLength::Auto`] the train batch is split over the runners;
    /// if it does not divide evenly, the first runners take one more timestep.
    /// Index 0, the local runner, counts as index 1.
    pub fn get_rollout_fragment_length(&self, worker_index: usize) -> usize {
        match self.rollout_fragment_length {
            RolloutFragmentLength::Fixed(n) => n,
            RolloutFragmentLength::Auto => {
                let n_runners = self.num_env_runners.max(1);
                let base = self.train_batch_size / n_runners;
                let diff = self.train_batch_size - base * n_runners;
                if worker_index.max(1) - 1 >= diff {
                    base
                } else {
                    base + 1
                }
            }
        }
    }

    /// Constructs [`EnvRunnerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`EnvRunnerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
