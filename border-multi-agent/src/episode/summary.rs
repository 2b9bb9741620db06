//! Per-episode statistics.
use crate::base::{AgentMap, EpisodeId, ModuleId};
use std::collections::BTreeMap;

/// Length, return and duration of an episode chunk, overall and per agent and module.
///
/// Summaries of the chunks of one episode can be folded with
/// [`absorb`](Self::absorb) into the summary of the whole episode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodeSummary {
    /// The episode.
    pub id: EpisodeId,

    /// Environment steps.
    pub len: usize,

    /// Sum of the rewards of all agents.
    pub ret: f32,

    /// Wall-clock duration in seconds.
    pub duration_s: f64,

    /// If the episode is done.
    pub is_done: bool,

    /// Steps of each agent.
    pub agent_steps: AgentMap<usize>,

    /// Return of each agent.
    pub agent_returns: AgentMap<f32>,

    /// Sum of the returns of the agents mapped to each module.
    pub module_returns: BTreeMap<ModuleId, f32>,
}

impl EpisodeSummary {
    /// Folds the statistics of another chunk of the same episode into `self`.
    pub fn absorb(&mut self, chunk: &EpisodeSummary) {
        debug_assert_eq!(self.id, chunk.id);
        self.len += chunk.len;
        self.ret += chunk.ret;
        self.duration_s += chunk.duration_s;
        for (aid, n) in chunk.agent_steps.iter() {
            *self.agent_steps.entry(aid.clone()).or_default() += n;
        }
        for (aid, r) in chunk.agent_returns.iter() {
            *self.agent_returns.entry(aid.clone()).or_default() += r;
        }
        for (mid, r) in chunk.module_returns.iter() {
            *self.module_returns.entry(mid.clone()).or_default() += r;
        }
    }
}
