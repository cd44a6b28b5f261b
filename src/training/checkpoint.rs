//! Flow checkpoint management

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cnf::ContinuousFlow;
use crate::error::Result;

/// Named flow parameters at a training step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCheckpoint {
    /// Step the parameters were taken at, `None` for the final state
    pub step: Option<usize>,
    /// Parameter name to flattened values
    pub parameters: BTreeMap<String, Vec<f64>>,
}

impl FlowCheckpoint {
    /// Snapshot the parameters of `flow`
    pub fn from_flow(flow: &ContinuousFlow, step: Option<usize>) -> Self {
        Self {
            step,
            parameters: flow.named_params(),
        }
    }

    /// Load the stored parameters into `flow`
    pub fn apply(&self, flow: &mut ContinuousFlow) -> Result<()> {
        flow.load_named_params(&self.parameters)
    }

    /// File name used for this checkpoint inside an output directory
    pub fn file_name(&self) -> String {
        match self.step {
            Some(step) => format!("{}_flow.json", step),
            None => "final_flow.json".to_string(),
        }
    }

    /// Write into `dir` under [`file_name`](Self::file_name)
    pub fn save_in<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(self.file_name());
        self.save(&path)?;
        Ok(path)
    }

    /// Save checkpoint to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Load checkpoint from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let checkpoint = serde_json::from_str(&content)?;
        Ok(checkpoint)
    }

    pub fn num_values(&self) -> usize {
        self.parameters.values().map(Vec::len).sum()
    }
}
