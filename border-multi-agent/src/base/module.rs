//! Decision module.
use super::{AgentMap, ModuleId, MultiAgentEnv};
use crate::{error::ModuleBuildError, record::RecordValue};
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

/// Extra outputs of a module for a single agent at a single step, keyed by column name.
pub type ExtraOutputs = BTreeMap<String, RecordValue>;

/// Output of a [`Module`] forward pass, and of a [`ModuleToEnv`](super::ModuleToEnv)
/// transform.
///
/// Each column holds one agent map per environment. Only a single environment is
/// supported, so every list has at most one element.
#[derive(Clone, Debug)]
pub struct ModuleOutput<A> {
    /// Actions stored in the episode.
    pub actions: Vec<AgentMap<A>>,

    /// Actions sent to the environment, e.g., clipped or unsquashed versions of
    /// `actions`. If `None`, `actions` are sent.
    pub actions_for_env: Option<Vec<AgentMap<A>>>,

    /// Other model outputs, e.g., action log-probabilities or value predictions.
    pub extra: BTreeMap<String, Vec<AgentMap<RecordValue>>>,
}

impl<A: Clone> ModuleOutput<A> {
    /// Constructs an output holding only actions.
    pub fn from_actions(actions: AgentMap<A>) -> Self {
        Self {
            actions: vec![actions],
            actions_for_env: None,
            extra: BTreeMap::new(),
        }
    }

    /// Adds an extra output column.
    pub fn with_extra(mut self, column: impl Into<String>, values: AgentMap<RecordValue>) -> Self {
        self.extra.insert(column.into(), vec![values]);
        self
    }

    /// Sets the actions sent to the environment.
    pub fn with_actions_for_env(mut self, actions_for_env: AgentMap<A>) -> Self {
        self.actions_for_env = Some(vec![actions_for_env]);
        self
    }

    /// Splits the output of the single environment into the actions to store,
    /// the actions to send to the environment and the extra outputs of each agent.
    ///
    /// Extra outputs are reshaped from `column -> [agent -> value]` to
    /// `agent -> column -> value`; column names are kept as they are.
    pub fn into_parts(self) -> (AgentMap<A>, AgentMap<A>, AgentMap<ExtraOutputs>) {
        let actions = self.actions.into_iter().next().unwrap_or_default();
        let actions_for_env = match self.actions_for_env {
            Some(a) => a.into_iter().next().unwrap_or_default(),
            None => actions.clone(),
        };

        let mut extra: AgentMap<ExtraOutputs> = AgentMap::new();
        for (column, per_env) in self.extra.into_iter() {
            if let Some(values) = per_env.into_iter().next() {
                for (agent_id, value) in values.into_iter() {
                    extra
                        .entry(agent_id)
                        .or_default()
                        .insert(column.clone(), value);
                }
            }
        }

        (actions, actions_for_env, extra)
    }
}

/// A learnable decision-making component serving one or more modules.
///
/// Agents are assigned to modules by the agent-to-module mapping of the runner.
pub trait Module<E: MultiAgentEnv> {
    /// Configuration.
    type Config: Clone;

    /// Input of the forward passes, produced by an [`EnvToModule`](super::EnvToModule).
    type Input;

    /// Weights exchanged by [`MultiAgentEnvRunner::export_state`] and
    /// [`MultiAgentEnvRunner::apply_state`].
    ///
    /// [`MultiAgentEnvRunner::export_state`]: crate::MultiAgentEnvRunner::export_state
    /// [`MultiAgentEnvRunner::apply_state`]: crate::MultiAgentEnvRunner::apply_state
    type State: Clone + Serialize + DeserializeOwned;

    /// Builds the module serving the given module ids.
    ///
    /// Return [`ModuleBuildError::NotImplemented`] if the module cannot be built for
    /// this setup; the runner then samples with random actions only.
    fn build(config: &Self::Config, module_ids: &[ModuleId]) -> Result<Self, ModuleBuildError>
    where
        Self: Sized;

    /// Forward pass in exploration mode.
    ///
    /// `t` is the lifetime number of environment steps sampled by the runner.
    fn forward_exploration(&mut self, input: Self::Input, t: usize)
        -> Result<ModuleOutput<E::Act>>;

    /// Forward pass in inference mode.
    fn forward_inference(&mut self, input: Self::Input) -> Result<ModuleOutput<E::Act>>;

    /// Returns the weights.
    fn get_state(&self) -> Self::State;

    /// Overwrites the weights.
    fn set_state(&mut self, state: Self::State) -> Result<()>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_into_parts_reshapes_extra_outputs() {
        let actions = AgentMap::from([("a".to_string(), 1i64), ("b".to_string(), 0)]);
        let logp = AgentMap::from([
            ("a".to_string(), RecordValue::Scalar(-0.5)),
            ("b".to_string(), RecordValue::Scalar(-1.5)),
        ]);
        let vf = AgentMap::from([("a".to_string(), RecordValue::Scalar(2.0))]);
        let out = ModuleOutput::from_actions(actions.clone())
            .with_extra("action_logp", logp)
            .with_extra("vf_preds", vf);

        let (acts, acts_for_env, extra) = out.into_parts();
        assert_eq!(acts, actions);
        assert_eq!(acts_for_env, actions);
        assert_eq!(extra["a"].len(), 2);
        assert_eq!(extra["b"].len(), 1);
        assert!(matches!(extra["a"]["vf_preds"], RecordValue::Scalar(v) if v == 2.0));
        assert!(matches!(extra["b"]["action_logp"], RecordValue::Scalar(v) if v == -1.5));
    }

    #[test]
    fn test_actions_for_env_override() {
        let actions = AgentMap::from([("a".to_string(), 5i64)]);
        let clipped = AgentMap::from([("a".to_string(), 1i64)]);
        let (acts, acts_for_env, extra) = ModuleOutput::from_actions(actions)
            .with_actions_for_env(clipped)
            .into_parts();
        assert_eq!(acts["a"], 5);
        assert_eq!(acts_for_env["a"], 1);
        assert!(extra.is_empty());
    }
}
