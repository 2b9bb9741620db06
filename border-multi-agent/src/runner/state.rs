//! State exchanged between runners and learners.
use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Parts of a runner included in [`RunnerState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateComponent {
    /// Weights of the module.
    Module,

    /// State of the env-to-module transform.
    EnvToModule,

    /// State of the module-to-env transform.
    ModuleToEnv,
}

/// State of a [`MultiAgentEnvRunner`](crate::MultiAgentEnvRunner).
///
/// `MS`, `PS` and `QS` are the states of the module, the env-to-module transform
/// and the module-to-env transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnerState<MS, PS, QS> {
    /// Version of the module weights. `0` forces the weights to be applied.
    pub weights_seq_no: u64,

    /// Environment steps sampled over the lifetime of the runner.
    pub num_env_steps_sampled_lifetime: Option<usize>,

    /// Weights of the module.
    pub module: Option<MS>,

    /// State of the env-to-module transform.
    pub env_to_module: Option<PS>,

    /// State of the module-to-env transform.
    pub module_to_env: Option<QS>,
}

impl<MS, PS, QS> Default for RunnerState<MS, PS, QS> {
    fn default() -> Self {
        Self {
            weights_seq_no: 0,
            num_env_steps_sampled_lifetime: None,
            module: None,
            env_to_module: None,
            module_to_env: None,
        }
    }
}

impl<MS, PS, QS> RunnerState<MS, PS, QS>
where
    MS: Serialize + DeserializeOwned,
    PS: Serialize + DeserializeOwned,
    QS: Serialize + DeserializeOwned,
{
    /// Constructs a state holding only module weights with the given version.
    pub fn from_weights(weights: MS, weights_seq_no: u64) -> Self {
        Self {
            weights_seq_no,
            module: Some(weights),
            ..Default::default()
        }
    }

    /// Loads a state from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let state = serde_yaml::from_reader(rdr)?;
        Ok(state)
    }

    /// Saves the state as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_save_and_load() -> Result<()> {
        let state = RunnerState::<Vec<f32>, usize, ()> {
            weights_seq_no: 3,
            num_env_steps_sampled_lifetime: Some(120),
            module: Some(vec![0.5, -1.0]),
            env_to_module: Some(7),
            module_to_env: None,
        };

        let dir = TempDir::new("runner_state")?;
        let path = dir.path().join("state.yaml");
        state.save(&path)?;
        let state_ = RunnerState::<Vec<f32>, usize, ()>::load(&path)?;
        assert_eq!(state, state_);
        Ok(())
    }
}
