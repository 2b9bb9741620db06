//! Trajectory of all agents in an environment.
use super::{EpisodeSummary, SingleAgentEpisode};
use crate::{
    base::{AgentId, AgentMap, EpisodeId, ExtraOutputs, ModuleId, MultiAgentEnv, MultiAgentStep},
    error::EpisodeError,
    AgentToModuleMapping,
};
use anyhow::Result;
use chrono::{DateTime, Local};
use log::debug;
use std::{collections::BTreeSet, sync::Arc};

/// Action of an agent still waiting for the agent's next observation, and the
/// rewards the agent received in the meantime.
struct Pending<A> {
    action: Option<(A, ExtraOutputs)>,
    reward: f32,
}

impl<A> Pending<A> {
    fn new() -> Self {
        Self {
            action: None,
            reward: 0.0,
        }
    }
}

/// Trajectory of all agents, or a chunk of it.
///
/// The set of acting agents may change at every step. An agent acts at step `t` iff
/// it received an observation at step `t - 1`. If an agent acts but receives no
/// observation in the same step, its action is kept pending until the next
/// observation of the agent arrives.
pub struct MultiAgentEpisode<E: MultiAgentEnv> {
    id: EpisodeId,
    agent_episodes: AgentMap<SingleAgentEpisode<E>>,
    agent_to_module_mapping: Arc<AgentToModuleMapping>,
    pending: AgentMap<Pending<E::Act>>,
    hanging_rewards: AgentMap<f32>,
    agents_to_act: BTreeSet<AgentId>,
    env_t_started: usize,
    env_t: usize,
    is_terminated: bool,
    is_truncated: bool,
    is_finalized: bool,
    start_time: Option<DateTime<Local>>,
    last_step_time: Option<DateTime<Local>>,
}

impl<E: MultiAgentEnv> MultiAgentEpisode<E> {
    /// Creates an empty episode with a new id.
    pub fn new(agent_to_module_mapping: Arc<AgentToModuleMapping>) -> Self {
        Self {
            id: format!("{:032x}", fastrand::u128(..)),
            agent_episodes: AgentMap::new(),
            agent_to_module_mapping,
            pending: AgentMap::new(),
            hanging_rewards: AgentMap::new(),
            agents_to_act: BTreeSet::new(),
            env_t_started: 0,
            env_t: 0,
            is_terminated: false,
            is_truncated: false,
            is_finalized: false,
            start_time: None,
            last_step_time: None,
        }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_finalized {
            return Err(EpisodeError::Finalized(self.id.clone()).into());
        }
        if self.is_done() {
            return Err(EpisodeError::Done(self.id.clone()).into());
        }
        Ok(())
    }

    fn start_agent(&mut self, agent_id: &AgentId, obs: E::Obs, info: E::Info) -> Result<()> {
        let module_id = self.agent_to_module_mapping.module_for(agent_id)?;
        let mut sa_episode = SingleAgentEpisode::new(agent_id.clone(), module_id);
        sa_episode.add_initial_observation(obs, info);
        self.agent_episodes.insert(agent_id.clone(), sa_episode);
        Ok(())
    }

    /// Adds the initial observations after an environment reset.
    pub fn add_env_reset(
        &mut self,
        obs: AgentMap<E::Obs>,
        mut infos: AgentMap<E::Info>,
    ) -> Result<()> {
        self.check_mutable()?;
        if self.is_reset() {
            return Err(EpisodeError::Invalid(format!("episode {} was already reset", self.id)).into());
        }

        for (agent_id, o) in obs.into_iter() {
            let info = infos.remove(&agent_id).unwrap_or_default();
            self.start_agent(&agent_id, o, info)?;
            self.agents_to_act.insert(agent_id);
        }

        let now = Local::now();
        self.start_time = Some(now);
        self.last_step_time = Some(now);
        Ok(())
    }

    /// Checks a step against the current state before anything is mutated.
    fn check_step(&self, step: &MultiAgentStep<E>, actions: &AgentMap<E::Act>) -> Result<()> {
        for agent_id in actions.keys() {
            if !self.agents_to_act.contains(agent_id) {
                return Err(EpisodeError::Invalid(format!(
                    "agent {} acted without being eligible to act",
                    agent_id
                ))
                .into());
            }
        }
        for agent_id in step.obs.keys() {
            match self.agent_episodes.get(agent_id) {
                Some(sa_episode) => {
                    let has_action = actions.contains_key(agent_id)
                        || self
                            .pending
                            .get(agent_id)
                            .map_or(false, |p| p.action.is_some());
                    if !has_action || sa_episode.is_done() {
                        return Err(EpisodeError::UnexpectedObservation(agent_id.clone()).into());
                    }
                }
                None => {
                    self.agent_to_module_mapping.module_for(agent_id)?;
                }
            }
        }
        Ok(())
    }

    /// Closes the pending action of an agent with its latest observation, or adds
    /// pending rewards to its last reward.
    ///
    /// Rewards of an agent without a step in this chunk are kept as hanging rewards.
    fn close_pending(&mut self, agent_id: &AgentId, is_terminated: bool, is_truncated: bool) -> Result<()> {
        let sa_episode = match self.agent_episodes.get_mut(agent_id) {
            Some(sa_episode) => sa_episode,
            None => return Ok(()),
        };

        if let Some(pending) = self.pending.remove(agent_id) {
            match (pending.action, sa_episode.last_observation().cloned()) {
                (Some((act, extra)), Some(obs)) => {
                    sa_episode.add_step(
                        obs,
                        act,
                        pending.reward,
                        E::Info::default(),
                        is_terminated,
                        is_truncated,
                        extra,
                    )?;
                }
                _ => {
                    if !sa_episode.add_to_last_reward(pending.reward) && pending.reward != 0.0 {
                        debug!(
                            "Hanging reward {} of agent {} without a step in this chunk",
                            pending.reward, agent_id
                        );
                        *self.hanging_rewards.entry(agent_id.clone()).or_default() +=
                            pending.reward;
                    }
                }
            }
        }
        sa_episode.mark_done(is_terminated, is_truncated);
        Ok(())
    }

    /// Adds an environment step.
    ///
    /// `actions` are the actions of the agents that acted, to be stored in the
    /// episode, and `extra_model_outputs` the other outputs of the module per agent.
    /// The global step counter is incremented once, regardless of the number of
    /// acting agents. Nothing is changed if an error is returned.
    pub fn add_env_step(
        &mut self,
        mut step: MultiAgentStep<E>,
        actions: AgentMap<E::Act>,
        mut extra_model_outputs: AgentMap<ExtraOutputs>,
    ) -> Result<()> {
        self.check_mutable()?;
        if !self.is_reset() {
            return Err(EpisodeError::NotReset(self.id.clone()).into());
        }
        self.check_step(&step, &actions)?;

        self.env_t += 1;

        for (agent_id, act) in actions.into_iter() {
            let extra = extra_model_outputs.remove(&agent_id).unwrap_or_default();
            self.pending
                .entry(agent_id)
                .or_insert_with(Pending::new)
                .action = Some((act, extra));
        }

        for (agent_id, r) in step.reward.iter() {
            if self.agent_episodes.contains_key(agent_id) {
                self.pending
                    .entry(agent_id.clone())
                    .or_insert_with(Pending::new)
                    .reward += *r;
            } else {
                debug!("Discarded reward {} of agent {} before its first observation", r, agent_id);
            }
        }

        let mut agents_to_act = BTreeSet::new();
        let observed = step.obs.keys().cloned().collect::<BTreeSet<_>>();
        for (agent_id, obs) in std::mem::take(&mut step.obs).into_iter() {
            let info = step.info.remove(&agent_id).unwrap_or_default();
            let is_terminated =
                step.all_terminated || step.is_terminated.get(&agent_id).copied().unwrap_or(false);
            let is_truncated =
                step.all_truncated || step.is_truncated.get(&agent_id).copied().unwrap_or(false);

            match self.agent_episodes.get_mut(&agent_id) {
                Some(sa_episode) => {
                    // `check_step()` guarantees a pending action.
                    let pending = self.pending.remove(&agent_id).unwrap_or_else(Pending::new);
                    if let Some((act, extra)) = pending.action {
                        sa_episode.add_step(
                            obs,
                            act,
                            pending.reward,
                            info,
                            is_terminated,
                            is_truncated,
                            extra,
                        )?;
                    }
                }
                None => self.start_agent(&agent_id, obs, info)?,
            }

            if !is_terminated && !is_truncated {
                agents_to_act.insert(agent_id);
            }
        }

        // Agents done without a final observation.
        let done_agents = step
            .is_terminated
            .iter()
            .chain(step.is_truncated.iter())
            .filter(|(agent_id, done)| **done && !observed.contains(*agent_id))
            .map(|(agent_id, _)| agent_id.clone())
            .collect::<BTreeSet<_>>();
        for agent_id in done_agents.iter() {
            let is_terminated = step.is_terminated.get(agent_id).copied().unwrap_or(false);
            let is_truncated = step.is_truncated.get(agent_id).copied().unwrap_or(false);
            self.close_pending(agent_id, is_terminated, is_truncated)?;
        }

        self.is_terminated = step.all_terminated;
        self.is_truncated = step.all_truncated;
        self.agents_to_act = agents_to_act;

        if self.is_done() {
            let agent_ids = self.agent_episodes.keys().cloned().collect::<Vec<_>>();
            for agent_id in agent_ids.iter() {
                self.close_pending(agent_id, self.is_terminated, self.is_truncated)?;
            }
            self.agents_to_act.clear();
        }

        self.last_step_time = Some(Local::now());
        Ok(())
    }

    /// Splits off the continuation of this episode.
    ///
    /// The continuation shares the id of this episode, starts at the current
    /// environment step and keeps the last `lookback_horizon` steps of every agent as
    /// read-only context. Pending actions and rewards move to the continuation,
    /// except the rewards of agents that are done, which are added to their last
    /// step in this chunk.
    pub fn cut(&mut self, lookback_horizon: usize) -> Self {
        let now = Local::now();
        let agent_episodes = &mut self.agent_episodes;
        self.pending.retain(|agent_id, pending| {
            if pending.action.is_some() {
                return true;
            }
            match agent_episodes.get_mut(agent_id) {
                Some(sa_episode) if sa_episode.is_done() => {
                    !sa_episode.add_to_last_reward(pending.reward)
                }
                _ => true,
            }
        });

        Self {
            id: self.id.clone(),
            agent_episodes: self
                .agent_episodes
                .iter()
                .map(|(agent_id, sa_episode)| (agent_id.clone(), sa_episode.cut(lookback_horizon)))
                .collect(),
            agent_to_module_mapping: self.agent_to_module_mapping.clone(),
            pending: std::mem::take(&mut self.pending),
            hanging_rewards: AgentMap::new(),
            agents_to_act: self.agents_to_act.clone(),
            env_t_started: self.env_t,
            env_t: self.env_t,
            is_terminated: self.is_terminated,
            is_truncated: self.is_truncated,
            is_finalized: false,
            start_time: self.start_time.map(|_| now),
            last_step_time: self.last_step_time.map(|_| now),
        }
    }

    /// Converts the episode into its read-only form.
    ///
    /// If `drop_zero_len_agent_episodes` is `true`, agents without a step in this
    /// chunk are removed.
    pub fn finalize(mut self, drop_zero_len_agent_episodes: bool) -> Self {
        if drop_zero_len_agent_episodes {
            self.agent_episodes.retain(|_, sa_episode| !sa_episode.is_empty());
        }
        for sa_episode in self.agent_episodes.values_mut() {
            sa_episode.finalize();
        }
        self.is_finalized = true;
        self
    }

    /// Checks the internal consistency of the episode.
    pub fn validate(&self) -> Result<()> {
        if self.env_t < self.env_t_started {
            return Err(EpisodeError::Invalid(format!(
                "env_t {} is smaller than env_t_started {}",
                self.env_t, self.env_t_started
            ))
            .into());
        }
        for sa_episode in self.agent_episodes.values() {
            sa_episode.validate()?;
            if sa_episode.len() > self.len() {
                return Err(EpisodeError::Invalid(format!(
                    "agent {} has {} steps in an episode of length {}",
                    sa_episode.agent_id(),
                    sa_episode.len(),
                    self.len()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Returns the statistics of this chunk.
    pub fn summary(&self) -> EpisodeSummary {
        let mut summary = EpisodeSummary {
            id: self.id.clone(),
            len: self.len(),
            ret: self.get_return(),
            duration_s: self.get_duration_s(),
            is_done: self.is_done(),
            ..Default::default()
        };
        for (agent_id, sa_episode) in self.agent_episodes.iter() {
            let ret = sa_episode.get_return();
            summary.agent_steps.insert(agent_id.clone(), sa_episode.len());
            summary.agent_returns.insert(agent_id.clone(), ret);
            *summary
                .module_returns
                .entry(sa_episode.module_id().clone())
                .or_default() += ret;
        }
        for (agent_id, r) in self.hanging_rewards.iter() {
            *summary.agent_returns.entry(agent_id.clone()).or_default() += r;
            if let Some(module_id) = self.module_for(agent_id) {
                *summary.module_returns.entry(module_id).or_default() += r;
            }
        }
        summary
    }

    /// The id, shared by all chunks of the episode.
    pub fn id(&self) -> &EpisodeId {
        &self.id
    }

    /// Environment steps in this chunk.
    pub fn len(&self) -> usize {
        self.env_t - self.env_t_started
    }

    /// Returns `true` if this chunk has no environment step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Environment steps since the reset of the episode.
    pub fn env_t(&self) -> usize {
        self.env_t
    }

    /// Environment step at which this chunk starts.
    pub fn env_t_started(&self) -> usize {
        self.env_t_started
    }

    /// Returns `true` once initial observations were added.
    pub fn is_reset(&self) -> bool {
        self.start_time.is_some()
    }

    /// Terminated or truncated for all agents.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }

    /// Terminated for all agents.
    pub fn is_terminated(&self) -> bool {
        self.is_terminated
    }

    /// Truncated for all agents.
    pub fn is_truncated(&self) -> bool {
        self.is_truncated
    }

    /// Returns `true` if the episode is read-only.
    pub fn is_finalized(&self) -> bool {
        self.is_finalized
    }

    /// Agents eligible to act at the next step.
    pub fn get_agents_to_act(&self) -> &BTreeSet<AgentId> {
        &self.agents_to_act
    }

    /// Sum of the rewards of all agents in this chunk, hanging rewards included.
    pub fn get_return(&self) -> f32 {
        self.agent_episodes.values().map(|e| e.get_return()).sum::<f32>()
            + self.hanging_rewards.values().sum::<f32>()
    }

    /// Rewards received in this chunk by agents without a step in it.
    ///
    /// These are the rewards of an agent that is done, received after the chunk
    /// holding its last step was returned.
    pub fn hanging_rewards(&self) -> &AgentMap<f32> {
        &self.hanging_rewards
    }

    /// Wall-clock seconds from the start of this chunk to its latest step.
    pub fn get_duration_s(&self) -> f64 {
        match (self.start_time, self.last_step_time) {
            (Some(start), Some(last)) => {
                (last - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
            }
            _ => 0.0,
        }
    }

    /// Trajectories of the agents.
    pub fn agent_episodes(&self) -> &AgentMap<SingleAgentEpisode<E>> {
        &self.agent_episodes
    }

    /// Trajectory of an agent, mutably, e.g., for observation write-back.
    pub fn agent_episode_mut(&mut self, agent_id: &str) -> Option<&mut SingleAgentEpisode<E>> {
        self.agent_episodes.get_mut(agent_id)
    }

    /// The module of the agent.
    pub fn module_for(&self, agent_id: &str) -> Option<ModuleId> {
        match self.agent_episodes.get(agent_id) {
            Some(sa_episode) => Some(sa_episode.module_id().clone()),
            None => self.agent_to_module_mapping.module_for(agent_id).ok(),
        }
    }
}
