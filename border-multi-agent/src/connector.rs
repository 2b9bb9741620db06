//! Default transform stages.
//!
//! [`DefaultEnvToModule`] collects the latest observation of every agent eligible to
//! act, grouped by module, into a [`ModuleInput`]. [`PassThroughModuleToEnv`] sends
//! the module output to the environment as it is.
use crate::{
    base::{AgentId, AgentMap, EnvToModule, Module, ModuleId, ModuleOutput, ModuleToEnv, MultiAgentEnv, SharedData},
    episode::MultiAgentEpisode,
};
use anyhow::Result;
use std::collections::BTreeMap;

/// Latest observations of the agents eligible to act, grouped by module.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleInput<O> {
    /// Observations of each module's agents.
    pub obs: BTreeMap<ModuleId, AgentMap<O>>,
}

impl<O> Default for ModuleInput<O> {
    fn default() -> Self {
        Self {
            obs: BTreeMap::new(),
        }
    }
}

impl<O> ModuleInput<O> {
    /// Observations of all agents, regardless of their module.
    pub fn agents(&self) -> impl Iterator<Item = (&AgentId, &O)> + '_ {
        self.obs.values().flat_map(|obs| obs.iter())
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.obs.values().map(|obs| obs.len()).sum()
    }

    /// Returns `true` if no agent is eligible to act.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a [`ModuleInput`] from the latest observations.
#[derive(Clone, Debug, Default)]
pub struct DefaultEnvToModule;

impl<E, M> EnvToModule<E, M> for DefaultEnvToModule
where
    E: MultiAgentEnv,
    M: Module<E, Input = ModuleInput<E::Obs>>,
{
    type State = ();

    fn call(
        &mut self,
        _module: Option<&M>,
        episodes: &mut [MultiAgentEpisode<E>],
        _explore: bool,
        _shared_data: &mut SharedData,
    ) -> Result<ModuleInput<E::Obs>> {
        let mut input = ModuleInput::default();

        for episode in episodes.iter() {
            for agent_id in episode.get_agents_to_act().iter() {
                let sa_episode = match episode.agent_episodes().get(agent_id) {
                    Some(sa_episode) => sa_episode,
                    None => continue,
                };
                if let Some(obs) = sa_episode.last_observation() {
                    input
                        .obs
                        .entry(sa_episode.module_id().clone())
                        .or_default()
                        .insert(agent_id.clone(), obs.clone());
                }
            }
        }

        Ok(input)
    }

    fn get_state(&self) -> Self::State {}

    fn set_state(&mut self, _state: Self::State) -> Result<()> {
        Ok(())
    }
}

/// Sends the module output to the environment unchanged.
#[derive(Clone, Debug, Default)]
pub struct PassThroughModuleToEnv;

impl<E, M> ModuleToEnv<E, M> for PassThroughModuleToEnv
where
    E: MultiAgentEnv,
    M: Module<E>,
{
    type State = ();

    fn call(
        &mut self,
        _module: Option<&M>,
        data: ModuleOutput<E::Act>,
        _episodes: &mut [MultiAgentEpisode<E>],
        _explore: bool,
        _shared_data: &mut SharedData,
    ) -> Result<ModuleOutput<E::Act>> {
        Ok(data)
    }

    fn get_state(&self) -> Self::State {}

    fn set_state(&mut self, _state: Self::State) -> Result<()> {
        Ok(())
    }
}
