use anyhow::Result;
use border_multi_agent::{
    connector::{DefaultEnvToModule, ModuleInput, PassThroughModuleToEnv},
    dummy::{
        CountingEnvToModule, ParityModule, ParityModuleConfig, RecordingCallbacks, TurnBasedEnv,
        TurnBasedEnvConfig,
    },
    error::{ModuleBuildError, RunnerError},
    metrics::*,
    AgentId, AgentMap, BatchMode, EnvRunnerConfig, Module, ModuleId, ModuleOutput,
    MultiAgentConfig, MultiAgentEnv, MultiAgentEnvRunner, MultiAgentEpisode, MultiAgentStep,
    NullCallbacks, RolloutFragmentLength, SampleArgs,
};
use std::collections::BTreeMap;

type Runner = MultiAgentEnvRunner<
    TurnBasedEnv,
    ParityModule,
    CountingEnvToModule,
    PassThroughModuleToEnv,
    RecordingCallbacks,
>;

type Trajectory = BTreeMap<AgentId, (Vec<i64>, Vec<i64>, Vec<f32>)>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> EnvRunnerConfig {
    EnvRunnerConfig::default().multi_agent(MultiAgentConfig::default().module("shared"))
}

fn build(config: EnvRunnerConfig, env_config: TurnBasedEnvConfig) -> Result<Runner> {
    build_with_module(config, env_config, ParityModuleConfig::default())
}

fn build_with_module(
    config: EnvRunnerConfig,
    env_config: TurnBasedEnvConfig,
    module_config: ParityModuleConfig,
) -> Result<Runner> {
    Runner::build(
        config,
        env_config,
        &module_config,
        CountingEnvToModule::default(),
        PassThroughModuleToEnv,
        RecordingCallbacks::default(),
        1,
    )
}

fn is_runner_error<T>(res: &Result<T>, f: impl Fn(&RunnerError) -> bool) -> bool {
    match res {
        Ok(_) => false,
        Err(e) => e.downcast_ref::<RunnerError>().map_or(false, f),
    }
}

/// Concatenates the chunks of each episode into per-agent observations, actions
/// and rewards.
fn trajectories(episodes: &[MultiAgentEpisode<TurnBasedEnv>]) -> Vec<Trajectory> {
    let mut trajs: Vec<Trajectory> = vec![];
    let mut last_id = None;

    for ep in episodes.iter() {
        if last_id.as_ref() != Some(ep.id()) {
            trajs.push(Trajectory::new());
            last_id = Some(ep.id().clone());
        }
        let traj = trajs.last_mut().unwrap();
        for (agent_id, sa_ep) in ep.agent_episodes().iter() {
            let (obs, acts, rewards) = traj.entry(agent_id.clone()).or_default();
            // The first observation of a continuation closes the previous chunk.
            let skip = if obs.is_empty() { 0 } else { 1 };
            obs.extend_from_slice(&sa_ep.observations()[skip..]);
            acts.extend_from_slice(sa_ep.actions());
            rewards.extend_from_slice(sa_ep.rewards());
        }
    }
    trajs
}

#[test]
fn test_random_timesteps_turn_based() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default()
        .turn_based(true)
        .episode_len(100);
    let mut runner = build(config(), env_config)?;

    let episodes = runner.sample(SampleArgs::timesteps(5).random_actions(true))?;
    assert_eq!(episodes.len(), 1);
    let chunk = &episodes[0];
    chunk.validate()?;
    assert_eq!(chunk.len(), 5);
    assert!(chunk.is_finalized());
    assert!(!chunk.is_done());
    assert_eq!(chunk.agent_episodes()["a0"].len(), 2);
    assert_eq!(chunk.agent_episodes()["a1"].len(), 2);
    assert_eq!(runner.module().unwrap().n_exploration(), 0);

    let metrics = runner.get_metrics();
    assert_eq!(metrics.get_scalar(NUM_EPISODES)?, 0.0);
    assert!(metrics.get_scalar(EPISODE_LEN_MEAN).is_err());
    assert_eq!(metrics.get_scalar(NUM_ENV_STEPS_SAMPLED)?, 5.0);
    // a1 observes at steps 1, 3 and 5, a0 at steps 2 and 4.
    let agent_steps = metrics.scalars_with_prefix(NUM_AGENT_STEPS_SAMPLED);
    assert_eq!(agent_steps["a0"], 2.0);
    assert_eq!(agent_steps["a1"], 3.0);
    assert_eq!(
        metrics.get_scalar(&format!("{}/shared", NUM_MODULE_STEPS_SAMPLED))?,
        5.0
    );
    Ok(())
}

#[test]
fn test_sample_episodes() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(4))?;

    let episodes = runner.sample(SampleArgs::episodes(3))?;
    assert_eq!(episodes.len(), 3);
    for ep in episodes.iter() {
        ep.validate()?;
        assert!(ep.is_done());
        assert!(ep.is_finalized());
        assert_eq!(ep.len(), 4);
        assert_eq!(ep.agent_episodes()["a0"].len(), 4);
        // Actions are the parity of the step counter: rewards 1, 2, 1, 2 per agent.
        assert_eq!(ep.get_return(), 12.0);
        assert_eq!(
            ep.agent_episodes()["a1"].actions(),
            &[0, 1, 0, 1]
        );
    }

    let metrics = runner.get_metrics();
    assert_eq!(metrics.get_scalar(NUM_EPISODES)?, 3.0);
    assert_eq!(metrics.get_scalar(EPISODE_LEN_MEAN)?, 4.0);
    assert_eq!(metrics.get_scalar(EPISODE_RETURN_MAX)?, 12.0);
    assert_eq!(
        metrics.get_scalar(&format!("{}/a0", AGENT_EPISODE_RETURNS_MEAN))?,
        6.0
    );
    assert_eq!(
        metrics.get_scalar(&format!("{}/shared", MODULE_EPISODE_RETURNS_MEAN))?,
        12.0
    );
    assert_eq!(metrics.get_scalar("custom/episode_ends")?, 3.0);

    // Nothing completed since the last pull.
    let metrics = runner.get_metrics();
    assert_eq!(metrics.get_scalar(NUM_EPISODES)?, 0.0);
    assert_eq!(metrics.get_scalar(EPISODE_LEN_MEAN)?, 4.0);
    Ok(())
}

#[test]
fn test_agent_lengths_bounded_by_episode() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default()
        .n_agents(3)
        .turn_based(true)
        .episode_len(5);
    let mut runner = build(config(), env_config)?;

    for ep in runner.sample(SampleArgs::episodes(2))?.iter() {
        let lens = ep
            .agent_episodes()
            .values()
            .map(|sa_ep| sa_ep.len())
            .collect::<Vec<_>>();
        assert!(lens.iter().all(|n| *n <= ep.len()));
        // One agent acts per step and every action is recorded, the pending ones
        // included.
        assert_eq!(lens.iter().sum::<usize>(), ep.len());
    }
    Ok(())
}

#[test]
fn test_chunk_boundary_is_transparent() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default()
        .turn_based(true)
        .episode_len(7);

    let mut split = build(config(), env_config.clone())?;
    let mut episodes = split.sample_timesteps(5, true, false, false)?;
    episodes.extend(split.sample_timesteps(6, true, false, false)?);

    let mut single = build(config(), env_config)?;
    let episodes_single = single.sample_timesteps(11, true, false, false)?;

    assert_eq!(episodes.len(), 3);
    assert_eq!(episodes_single.len(), 2);
    assert_eq!(episodes[0].id(), episodes[1].id());
    assert_eq!(episodes[1].env_t_started(), 5);
    assert_eq!(trajectories(&episodes), trajectories(&episodes_single));

    // The look-ahead of the first call replaces the transform call of the first
    // step of the second call.
    let n_calls = |runner: &Runner| runner.env_to_module().calls().len();
    assert_eq!(n_calls(&split), 13);
    assert_eq!(n_calls(&split), n_calls(&single));
    Ok(())
}

#[test]
fn test_chunked_metrics_equal_single_chunk_metrics() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default()
        .turn_based(true)
        .episode_len(7);

    let mut split = build(config(), env_config.clone())?;
    split.sample_timesteps(5, true, false, false)?;
    // Pulling in between keeps the first chunk for later.
    let metrics = split.get_metrics();
    assert_eq!(metrics.get_scalar(NUM_EPISODES)?, 0.0);
    split.sample_timesteps(6, true, false, false)?;

    let mut single = build(config(), env_config)?;
    single.sample_timesteps(11, true, false, false)?;

    let m_split = split.get_metrics();
    let m_single = single.get_metrics();
    for key in [
        NUM_EPISODES,
        EPISODE_LEN_MEAN,
        EPISODE_LEN_MIN,
        EPISODE_RETURN_MEAN,
        EPISODE_RETURN_MAX,
        NUM_ENV_STEPS_SAMPLED_LIFETIME,
        "agent_episode_returns_mean/a0",
        "agent_episode_returns_mean/a1",
        "agent_steps/a0",
        "agent_steps/a1",
        "module_episode_returns_mean/shared",
    ]
    .iter()
    {
        assert_eq!(m_split.get_scalar(key)?, m_single.get_scalar(key)?, "{}", key);
    }
    assert_eq!(m_split.get_scalar(NUM_EPISODES)?, 1.0);
    assert_eq!(m_split.get_scalar(EPISODE_LEN_MEAN)?, 7.0);
    Ok(())
}

#[test]
fn test_zero_step_chunks_are_not_returned() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(4))?;
    assert!(runner.sample_timesteps(0, true, false, false)?.is_empty());

    // The episode completes on the last step; the new one has no step yet.
    let episodes = runner.sample_timesteps(4, true, false, false)?;
    assert_eq!(episodes.len(), 1);
    assert!(episodes[0].is_done());
    assert!(runner.sample_timesteps(0, true, false, false)?.is_empty());
    assert_eq!(runner.episode().map(|ep| ep.len()), Some(0));
    Ok(())
}

#[test]
fn test_terminal_observation_is_transformed() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(4))?;
    runner.sample_episodes(3, true, false)?;

    let transform = runner.env_to_module();
    assert_eq!(transform.n_terminal_calls(), 3);
    // One call per step, plus one per terminal observation.
    assert_eq!(transform.calls().len(), 15);
    assert!(transform
        .calls()
        .iter()
        .filter(|c| c.is_done)
        .all(|c| c.env_t == 4 && c.n_agents == 0));
    Ok(())
}

#[test]
fn test_lookahead_input_is_reused() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(100))?;
    runner.sample_timesteps(3, true, false, false)?;
    // Three steps plus the look-ahead for the next call.
    assert_eq!(runner.env_to_module().calls().len(), 4);

    runner.sample_timesteps(2, true, false, false)?;
    // The first step of this call reused the look-ahead.
    assert_eq!(runner.env_to_module().calls().len(), 6);
    assert_eq!(runner.module().unwrap().n_exploration(), 5);
    // Exploration sees the lifetime step count before each step.
    assert_eq!(runner.module().unwrap().last_t(), Some(4));
    Ok(())
}

#[test]
fn test_inference_mode() -> Result<()> {
    init();
    let config = config().explore(false);
    let mut runner = build(config, TurnBasedEnvConfig::default().episode_len(3))?;
    runner.sample(SampleArgs::episodes(1))?;
    assert_eq!(runner.module().unwrap().n_inference(), 3);
    assert_eq!(runner.module().unwrap().n_exploration(), 0);

    runner.sample(SampleArgs::episodes(1).explore(true))?;
    assert_eq!(runner.module().unwrap().n_exploration(), 3);
    Ok(())
}

#[test]
fn test_batch_modes() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default().episode_len(5);

    let config_ = config()
        .batch_mode(BatchMode::TruncateEpisodes)
        .rollout_fragment_length(RolloutFragmentLength::Fixed(3));
    let mut runner = build(config_, env_config.clone())?;
    let episodes = runner.sample(SampleArgs::default())?;
    assert_eq!(episodes.iter().map(|ep| ep.len()).sum::<usize>(), 3);

    let config_ = config().batch_mode(BatchMode::CompleteEpisodes);
    let mut runner = build(config_, env_config)?;
    let episodes = runner.sample(SampleArgs::default())?;
    assert_eq!(episodes.len(), 1);
    assert!(episodes[0].is_done());
    Ok(())
}

#[test]
fn test_force_reset() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(100))?;
    let first = runner.sample(SampleArgs::timesteps(2))?;
    let second = runner.sample(SampleArgs::timesteps(2))?;
    assert_eq!(first[0].id(), second[0].id());

    let third = runner.sample(SampleArgs::timesteps(2).force_reset(true))?;
    assert_ne!(second[0].id(), third[0].id());
    assert_eq!(third[0].env_t_started(), 0);
    assert_eq!(runner.env().unwrap().n_resets(), 2);
    Ok(())
}

#[test]
fn test_callback_order() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(2))?;
    runner.sample(SampleArgs::episodes(1))?;
    assert_eq!(
        runner.callbacks().events,
        vec!["env_created", "created", "start", "step", "step", "end", "sample_end:1"]
    );
    Ok(())
}

#[test]
fn test_step_failure_discards_episode() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default()
        .episode_len(100)
        .fail_at_step(3);
    let mut runner = build(config(), env_config)?;

    assert!(runner.sample_timesteps(5, true, false, false).is_err());
    assert!(runner.episode().is_none());
    // Only completed steps were counted.
    assert_eq!(runner.num_env_steps_sampled_lifetime(), 2);

    let episodes = runner.sample_timesteps(2, true, false, false)?;
    assert_eq!(episodes[0].len(), 2);
    assert_eq!(episodes[0].env_t_started(), 0);
    assert_eq!(runner.env().unwrap().n_resets(), 2);
    Ok(())
}

#[test]
fn test_configuration_errors() -> Result<()> {
    init();
    let env_config = TurnBasedEnvConfig::default();

    let res = build(EnvRunnerConfig::default(), env_config.clone());
    assert!(is_runner_error(&res, |e| matches!(e, RunnerError::NotMultiAgent)));

    let bad_mapping = EnvRunnerConfig::default().multi_agent(
        MultiAgentConfig::default()
            .module("m0")
            .map_agent("a0", "m1"),
    );
    let res = build(bad_mapping, env_config.clone());
    assert!(is_runner_error(&res, |e| matches!(e, RunnerError::UnknownModule(_))));

    let mut runner = build(config(), env_config)?;
    let args = SampleArgs {
        num_timesteps: Some(1),
        num_episodes: Some(1),
        ..Default::default()
    };
    let res = runner.sample(args);
    assert!(is_runner_error(&res, |e| matches!(
        e,
        RunnerError::BothTimestepsAndEpisodes
    )));
    assert_eq!(runner.env().unwrap().n_resets(), 0);
    Ok(())
}

#[test]
fn test_runner_without_module() -> Result<()> {
    init();
    let module_config = ParityModuleConfig {
        unavailable: true,
        ..Default::default()
    };
    let mut runner = build_with_module(config(), TurnBasedEnvConfig::default(), module_config)?;
    assert!(runner.module().is_none());
    assert!(runner.assert_healthy().is_err());

    let res = runner.sample(SampleArgs::timesteps(2));
    assert!(is_runner_error(&res, |e| matches!(e, RunnerError::NoModule)));

    let episodes = runner.sample(SampleArgs::episodes(1).random_actions(true))?;
    assert_eq!(episodes.len(), 1);
    // No module, no transform calls.
    assert!(runner.env_to_module().calls().is_empty());
    Ok(())
}

#[test]
fn test_make_env_and_stop() -> Result<()> {
    init();
    let mut runner = build(config(), TurnBasedEnvConfig::default().episode_len(100))?;
    runner.assert_healthy()?;
    runner.sample_timesteps(3, true, false, false)?;

    runner.make_env()?;
    assert_eq!(runner.env().unwrap().n_resets(), 0);
    let episodes = runner.sample_timesteps(1, true, false, false)?;
    assert_eq!(episodes[0].env_t_started(), 0);
    assert_eq!(runner.env().unwrap().n_resets(), 1);
    assert_eq!(
        runner
            .callbacks()
            .events
            .iter()
            .filter(|e| *e == "env_created")
            .count(),
        2
    );

    runner.stop()?;
    assert!(runner.env().is_none());
    let res = runner.sample_timesteps(1, true, false, false);
    assert!(is_runner_error(&res, |e| matches!(e, RunnerError::NoEnv)));
    Ok(())
}

/// Two agents. a1 acts once and is terminated without an observation at step 1,
/// then receives a reward at step 2. The episode ends at step 3.
struct LateRewardEnv {
    t: usize,
}

impl MultiAgentEnv for LateRewardEnv {
    type Config = ();
    type Obs = i64;
    type Act = i64;
    type Info = ();

    fn build(_config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self { t: 0 })
    }

    fn reset(&mut self) -> Result<(AgentMap<i64>, AgentMap<()>)> {
        self.t = 0;
        let obs = AgentMap::from([("a0".to_string(), 0), ("a1".to_string(), 0)]);
        Ok((obs, AgentMap::new()))
    }

    fn step(&mut self, _act: &AgentMap<i64>) -> Result<MultiAgentStep<Self>> {
        self.t += 1;
        let obs = AgentMap::from([("a0".to_string(), self.t as i64)]);
        let mut reward = AgentMap::from([("a0".to_string(), 1.0)]);
        match self.t {
            1 => {
                reward.insert("a1".to_string(), 1.0);
                let mut step = MultiAgentStep::new(obs, reward);
                step.is_terminated.insert("a1".to_string(), true);
                Ok(step)
            }
            2 => {
                reward.insert("a1".to_string(), 2.0);
                Ok(MultiAgentStep::new(obs, reward))
            }
            _ => {
                let mut step = MultiAgentStep::new(obs, reward);
                step.all_terminated = true;
                Ok(step)
            }
        }
    }

    fn action_space_sample(&mut self) -> AgentMap<i64> {
        AgentMap::from([("a0".to_string(), 0), ("a1".to_string(), 0)])
    }
}

/// Always takes action 0.
struct ZeroModule;

impl Module<LateRewardEnv> for ZeroModule {
    type Config = ();
    type Input = ModuleInput<i64>;
    type State = ();

    fn build(_config: &Self::Config, _module_ids: &[ModuleId]) -> Result<Self, ModuleBuildError> {
        Ok(Self)
    }

    fn forward_exploration(&mut self, input: Self::Input, _t: usize) -> Result<ModuleOutput<i64>> {
        self.forward_inference(input)
    }

    fn forward_inference(&mut self, input: Self::Input) -> Result<ModuleOutput<i64>> {
        let actions = input.agents().map(|(agent_id, _)| (agent_id.clone(), 0)).collect();
        Ok(ModuleOutput::from_actions(actions))
    }

    fn get_state(&self) -> Self::State {}

    fn set_state(&mut self, _state: Self::State) -> Result<()> {
        Ok(())
    }
}

type LateRewardRunner = MultiAgentEnvRunner<
    LateRewardEnv,
    ZeroModule,
    DefaultEnvToModule,
    PassThroughModuleToEnv,
    NullCallbacks,
>;

fn late_reward_metrics(splits: &[usize]) -> Result<BTreeMap<&'static str, f32>> {
    let mut runner = LateRewardRunner::build(
        config(),
        (),
        &(),
        DefaultEnvToModule,
        PassThroughModuleToEnv,
        NullCallbacks,
        1,
    )?;
    for n in splits.iter() {
        runner.sample_timesteps(*n, true, false, false)?;
    }
    let metrics = runner.get_metrics();
    let mut values = BTreeMap::new();
    for key in [
        NUM_EPISODES,
        EPISODE_RETURN_MEAN,
        "agent_episode_returns_mean/a0",
        "agent_episode_returns_mean/a1",
        "agent_steps/a1",
        "module_episode_returns_mean/shared",
    ] {
        values.insert(key, metrics.get_scalar(key)?);
    }
    Ok(values)
}

#[test]
fn test_late_reward_of_done_agent_survives_chunking() -> Result<()> {
    init();
    let single = late_reward_metrics(&[3])?;
    assert_eq!(single[NUM_EPISODES], 1.0);
    assert_eq!(single[EPISODE_RETURN_MEAN], 6.0);
    assert_eq!(single["agent_episode_returns_mean/a1"], 3.0);
    assert_eq!(single["agent_steps/a1"], 1.0);

    for splits in [[1, 2], [2, 1]] {
        assert_eq!(late_reward_metrics(&splits)?, single, "{:?}", splits);
    }
    Ok(())
}
