//! Transform stages between the environment and the module.
use super::{Module, ModuleOutput, MultiAgentEnv};
use crate::{episode::MultiAgentEpisode, record::RecordValue, AgentToModuleMapping};
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Data shared by the transform stages of a runner during the lifetime of an episode.
pub struct SharedData {
    /// Assignment of agents to modules.
    pub agent_to_module_mapping: Arc<AgentToModuleMapping>,

    /// Free-form values written and read by the transforms.
    pub values: BTreeMap<String, RecordValue>,
}

impl SharedData {
    /// Creates shared data with the given mapping and no values.
    pub fn new(agent_to_module_mapping: Arc<AgentToModuleMapping>) -> Self {
        Self {
            agent_to_module_mapping,
            values: BTreeMap::new(),
        }
    }
}

/// Transforms episodes into the input of a [`Module`].
///
/// Implementations may write processed observations back into the episodes,
/// e.g., for observation normalization. The runner calls this stage once more on
/// the terminal observation of every finished episode, so such write-backs see
/// every observation exactly once.
pub trait EnvToModule<E: MultiAgentEnv, M: Module<E>> {
    /// Internal state, exchanged by runner state synchronization.
    type State: Clone + Serialize + DeserializeOwned;

    /// Produces the module input from the latest data in `episodes`.
    fn call(
        &mut self,
        module: Option<&M>,
        episodes: &mut [MultiAgentEpisode<E>],
        explore: bool,
        shared_data: &mut SharedData,
    ) -> Result<M::Input>;

    /// Returns the internal state.
    fn get_state(&self) -> Self::State;

    /// Overwrites the internal state.
    fn set_state(&mut self, state: Self::State) -> Result<()>;
}

/// Transforms the output of a [`Module`] into actions ready for the environment.
pub trait ModuleToEnv<E: MultiAgentEnv, M: Module<E>> {
    /// Internal state, exchanged by runner state synchronization.
    type State: Clone + Serialize + DeserializeOwned;

    /// Transforms `data`, the output of the module's forward pass.
    fn call(
        &mut self,
        module: Option<&M>,
        data: ModuleOutput<E::Act>,
        episodes: &mut [MultiAgentEpisode<E>],
        explore: bool,
        shared_data: &mut SharedData,
    ) -> Result<ModuleOutput<E::Act>>;

    /// Returns the internal state.
    fn get_state(&self) -> Self::State;

    /// Overwrites the internal state.
    fn set_state(&mut self, state: Self::State) -> Result<()>;
}
