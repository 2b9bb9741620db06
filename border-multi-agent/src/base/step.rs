//! Environment step.
use super::{AgentMap, MultiAgentEnv};

/// Additional information to `Obs` and `Act`.
pub trait Info: Clone + Default {}

impl Info for () {}

/// Outcome of a single step of a [`MultiAgentEnv`].
///
/// Every map only contains the agents the environment reported on in this step.
/// An agent missing from `obs` does not act in the next step.
pub struct MultiAgentStep<E: MultiAgentEnv> {
    /// Observations of the agents that act next.
    pub obs: AgentMap<E::Obs>,

    /// Rewards.
    pub reward: AgentMap<f32>,

    /// Flags denoting agents whose episodes are terminated.
    pub is_terminated: AgentMap<bool>,

    /// Flags denoting agents whose episodes are truncated.
    pub is_truncated: AgentMap<bool>,

    /// The episode is terminated for all agents.
    pub all_terminated: bool,

    /// The episode is truncated for all agents.
    pub all_truncated: bool,

    /// Information defined by user.
    pub info: AgentMap<E::Info>,
}

impl<E: MultiAgentEnv> MultiAgentStep<E> {
    /// Constructs a [`MultiAgentStep`] with no termination or truncation.
    pub fn new(obs: AgentMap<E::Obs>, reward: AgentMap<f32>) -> Self {
        Self {
            obs,
            reward,
            is_terminated: AgentMap::new(),
            is_truncated: AgentMap::new(),
            all_terminated: false,
            all_truncated: false,
            info: AgentMap::new(),
        }
    }

    #[inline]
    /// Terminated or truncated for all agents.
    ///
    /// This flag is authoritative; individual agent flags never end the episode.
    pub fn is_done(&self) -> bool {
        self.all_terminated || self.all_truncated
    }
}
