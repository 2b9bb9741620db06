//! Environment.
use super::{Act, AgentMap, Info, MultiAgentStep, Obs};
use anyhow::Result;

/// Represents a multi-agent environment.
///
/// At every step only a subset of the agents may act: the agents whose observations
/// were returned by the preceding [`reset`](Self::reset) or [`step`](Self::step).
/// Vectorized environments are not supported; parallelism is obtained by running
/// several runners, each owning one environment.
pub trait MultiAgentEnv {
    /// Configurations.
    type Config: Clone;

    /// Observation of an agent.
    type Obs: Obs;

    /// Action of an agent.
    type Act: Act;

    /// Information in the [`MultiAgentStep`] object.
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Resets the environment and returns the initial observations and infos.
    fn reset(&mut self) -> Result<(AgentMap<Self::Obs>, AgentMap<Self::Info>)>;

    /// Performes an environment step with the actions of the acting agents.
    fn step(&mut self, act: &AgentMap<Self::Act>) -> Result<MultiAgentStep<Self>>
    where
        Self: Sized;

    /// Samples an action for every agent from its action space.
    fn action_space_sample(&mut self) -> AgentMap<Self::Act>;

    /// Checks if the environment is well-formed.
    ///
    /// Called once after construction. Failures are logged, not fatal.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Releases resources held by the environment.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
