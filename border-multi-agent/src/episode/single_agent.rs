//! Trajectory of a single agent.
use crate::{
    base::{AgentId, ExtraOutputs, ModuleId, MultiAgentEnv},
    error::EpisodeError,
};
use anyhow::Result;

/// Trajectory of a single agent within a [`MultiAgentEpisode`].
///
/// The first `lookback` actions, rewards and extra outputs, together with the
/// observations and infos preceding them, are read-only context inherited from the
/// previous chunk of the episode. Once started, there is always one observation more
/// than actions.
///
/// [`MultiAgentEpisode`]: super::MultiAgentEpisode
pub struct SingleAgentEpisode<E: MultiAgentEnv> {
    agent_id: AgentId,
    module_id: ModuleId,
    observations: Vec<E::Obs>,
    infos: Vec<E::Info>,
    actions: Vec<E::Act>,
    rewards: Vec<f32>,
    extra_model_outputs: Vec<ExtraOutputs>,
    lookback: usize,
    is_terminated: bool,
    is_truncated: bool,
    is_finalized: bool,
}

impl<E: MultiAgentEnv> SingleAgentEpisode<E> {
    pub(crate) fn new(agent_id: AgentId, module_id: ModuleId) -> Self {
        Self {
            agent_id,
            module_id,
            observations: vec![],
            infos: vec![],
            actions: vec![],
            rewards: vec![],
            extra_model_outputs: vec![],
            lookback: 0,
            is_terminated: false,
            is_truncated: false,
            is_finalized: false,
        }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_finalized {
            return Err(EpisodeError::Finalized(self.agent_id.clone()).into());
        }
        Ok(())
    }

    pub(crate) fn add_initial_observation(&mut self, obs: E::Obs, info: E::Info) {
        debug_assert!(self.observations.is_empty());
        self.observations.push(obs);
        self.infos.push(info);
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_step(
        &mut self,
        obs: E::Obs,
        act: E::Act,
        reward: f32,
        info: E::Info,
        is_terminated: bool,
        is_truncated: bool,
        extra_model_outputs: ExtraOutputs,
    ) -> Result<()> {
        self.check_mutable()?;
        if self.is_done() {
            return Err(EpisodeError::Done(self.agent_id.clone()).into());
        }
        if self.observations.is_empty() {
            return Err(EpisodeError::NotReset(self.agent_id.clone()).into());
        }
        self.observations.push(obs);
        self.infos.push(info);
        self.actions.push(act);
        self.rewards.push(reward);
        self.extra_model_outputs.push(extra_model_outputs);
        self.is_terminated = is_terminated;
        self.is_truncated = is_truncated;
        Ok(())
    }

    /// Adds `reward` to the last reward of this chunk.
    ///
    /// Returns `false`, without change, if the chunk has no step.
    pub(crate) fn add_to_last_reward(&mut self, reward: f32) -> bool {
        if self.len() == 0 {
            return false;
        }
        if let Some(r) = self.rewards.last_mut() {
            *r += reward;
        }
        true
    }

    pub(crate) fn mark_done(&mut self, is_terminated: bool, is_truncated: bool) {
        self.is_terminated |= is_terminated;
        self.is_truncated |= is_truncated;
    }

    /// Creates the continuation of this trajectory, keeping the last
    /// `lookback_horizon` steps as context.
    pub(crate) fn cut(&self, lookback_horizon: usize) -> Self {
        let n = lookback_horizon.min(self.actions.len());
        let n_acts = self.actions.len();
        let n_obs = self.observations.len().min(n + 1);
        let ix_obs = self.observations.len() - n_obs;

        Self {
            agent_id: self.agent_id.clone(),
            module_id: self.module_id.clone(),
            observations: self.observations[ix_obs..].to_vec(),
            infos: self.infos[ix_obs..].to_vec(),
            actions: self.actions[n_acts - n..].to_vec(),
            rewards: self.rewards[n_acts - n..].to_vec(),
            extra_model_outputs: self.extra_model_outputs[n_acts - n..].to_vec(),
            lookback: n,
            is_terminated: self.is_terminated,
            is_truncated: self.is_truncated,
            is_finalized: false,
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.is_finalized = true;
    }

    /// Checks the internal consistency of the trajectory.
    pub fn validate(&self) -> Result<()> {
        let n = self.actions.len();
        let invalid = |msg: String| -> Result<()> {
            Err(EpisodeError::Invalid(format!("agent {}: {}", self.agent_id, msg)).into())
        };

        if self.observations.is_empty() {
            if n > 0 {
                return invalid("actions without observations".to_string());
            }
        } else if self.observations.len() != n + 1 {
            return invalid(format!(
                "{} observations for {} actions",
                self.observations.len(),
                n
            ));
        }
        if self.infos.len() != self.observations.len() {
            return invalid("infos and observations differ in length".to_string());
        }
        if self.rewards.len() != n || self.extra_model_outputs.len() != n {
            return invalid("rewards or extra outputs differ from actions".to_string());
        }
        if self.lookback > n {
            return invalid(format!("lookback {} exceeds {} actions", self.lookback, n));
        }
        Ok(())
    }

    /// The agent.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The module which was responsible for the agent when it joined the episode.
    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    /// The number of steps in this chunk, excluding lookback context.
    pub fn len(&self) -> usize {
        self.actions.len() - self.lookback
    }

    /// Returns `true` if this chunk has no step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of lookback steps inherited from the previous chunk.
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// The sum of the rewards in this chunk.
    pub fn get_return(&self) -> f32 {
        self.rewards[self.lookback..].iter().sum()
    }

    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }

    /// Terminated.
    pub fn is_terminated(&self) -> bool {
        self.is_terminated
    }

    /// Truncated.
    pub fn is_truncated(&self) -> bool {
        self.is_truncated
    }

    /// Observations of this chunk. The first one is the observation the first action
    /// was taken on.
    pub fn observations(&self) -> &[E::Obs] {
        let ix = self.lookback.min(self.observations.len());
        &self.observations[ix..]
    }

    /// Observations including the lookback context.
    pub fn observations_with_lookback(&self) -> &[E::Obs] {
        &self.observations
    }

    /// Infos aligned with [`observations`](Self::observations).
    pub fn infos(&self) -> &[E::Info] {
        let ix = self.lookback.min(self.infos.len());
        &self.infos[ix..]
    }

    /// Actions of this chunk.
    pub fn actions(&self) -> &[E::Act] {
        &self.actions[self.lookback..]
    }

    /// Actions including the lookback context.
    pub fn actions_with_lookback(&self) -> &[E::Act] {
        &self.actions
    }

    /// Rewards of this chunk.
    pub fn rewards(&self) -> &[f32] {
        &self.rewards[self.lookback..]
    }

    /// Extra model outputs of this chunk.
    pub fn extra_model_outputs(&self) -> &[ExtraOutputs] {
        &self.extra_model_outputs[self.lookback..]
    }

    /// The latest observation.
    pub fn last_observation(&self) -> Option<&E::Obs> {
        self.observations.last()
    }

    /// Overwrites the latest observation, e.g., with a normalized version.
    pub fn set_last_observation(&mut self, obs: E::Obs) -> Result<()> {
        self.check_mutable()?;
        match self.observations.last_mut() {
            Some(o) => {
                *o = obs;
                Ok(())
            }
            None => Err(EpisodeError::NotReset(self.agent_id.clone()).into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dummy::TurnBasedEnv;

    type Episode = SingleAgentEpisode<TurnBasedEnv>;

    fn episode_with_steps(n: usize) -> Episode {
        let mut ep = Episode::new("a0".to_string(), "m0".to_string());
        ep.add_initial_observation(0, ());
        for i in 0..n {
            let i = i as i64;
            ep.add_step(i + 1, i * 10, 1.0, (), false, false, ExtraOutputs::new())
                .unwrap();
        }
        ep
    }

    #[test]
    fn test_len_and_return() -> Result<()> {
        let ep = episode_with_steps(3);
        ep.validate()?;
        assert_eq!(ep.len(), 3);
        assert_eq!(ep.get_return(), 3.0);
        assert_eq!(ep.observations(), &[0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_cut_keeps_lookback() -> Result<()> {
        let ep = episode_with_steps(3);
        let mut cont = ep.cut(2);
        cont.validate()?;
        assert_eq!(cont.len(), 0);
        assert_eq!(cont.lookback(), 2);
        assert_eq!(cont.get_return(), 0.0);
        assert_eq!(cont.observations(), &[3]);
        assert_eq!(cont.observations_with_lookback(), &[1, 2, 3]);
        assert_eq!(cont.actions_with_lookback(), &[10, 20]);

        cont.add_step(4, 30, 0.5, (), false, false, ExtraOutputs::new())?;
        cont.validate()?;
        assert_eq!(cont.len(), 1);
        assert_eq!(cont.actions(), &[30]);
        assert_eq!(cont.get_return(), 0.5);
        Ok(())
    }

    #[test]
    fn test_cut_horizon_longer_than_trajectory() -> Result<()> {
        let ep = episode_with_steps(1);
        let cont = ep.cut(5);
        cont.validate()?;
        assert_eq!(cont.lookback(), 1);
        assert_eq!(cont.observations_with_lookback(), &[0, 1]);
        Ok(())
    }

    #[test]
    fn test_finalized_is_read_only() {
        let mut ep = episode_with_steps(1);
        ep.finalize();
        assert!(ep.set_last_observation(7).is_err());
        assert!(ep
            .add_step(2, 0, 0.0, (), false, false, ExtraOutputs::new())
            .is_err());
    }

    #[test]
    fn test_no_step_after_done() {
        let mut ep = episode_with_steps(1);
        ep.mark_done(true, false);
        assert!(ep
            .add_step(2, 0, 0.0, (), false, false, ExtraOutputs::new())
            .is_err());
        assert!(ep.add_to_last_reward(0.5));
        assert_eq!(ep.get_return(), 1.5);
        assert!(!ep.cut(1).add_to_last_reward(0.5));
    }
}
