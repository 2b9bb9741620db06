//! Core functionalities.
mod callbacks;
mod connector;
mod env;
mod module;
mod step;
pub use callbacks::{Callbacks, EpisodeContext, NullCallbacks};
pub use connector::{EnvToModule, ModuleToEnv, SharedData};
pub use env::MultiAgentEnv;
pub use module::{ExtraOutputs, Module, ModuleOutput};
pub use step::{Info, MultiAgentStep};
use std::{collections::BTreeMap, fmt::Debug};

/// Identifier of an agent in a multi-agent environment.
pub type AgentId = String;

/// Identifier of a learnable module.
pub type ModuleId = String;

/// Identifier of an episode, stable across chunk boundaries.
pub type EpisodeId = String;

/// A mapping keyed by agent id.
///
/// Ordered so that iteration over agents is deterministic.
pub type AgentMap<T> = BTreeMap<AgentId, T>;

/// Observation of a single agent.
pub trait Obs: Clone + Debug {}

/// Action of a single agent.
pub trait Act: Clone + Debug {}

impl Obs for f32 {}
impl Obs for Vec<f32> {}
impl Obs for i64 {}
impl Act for f32 {}
impl Act for Vec<f32> {}
impl Act for i64 {}
