//! Run configuration, loaded once from a JSON params file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detection::DEFAULT_TOP_K;
use crate::error::{NodError, Result};
use crate::fusion::FusionConfig;
use crate::inference::LoopConfig;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_class_len_per_prompt() -> usize {
    81
}

fn default_num_categories() -> usize {
    1203
}

fn default_background_class_id() -> u32 {
    80
}

fn default_max_dets_per_image() -> usize {
    300
}

fn default_checkpoint_interval() -> usize {
    2500
}

fn default_max_warmup() -> usize {
    5
}

fn default_log_interval_secs() -> u64 {
    5
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("outputs/custom")
}

/// Immutable run configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodConfig {
    /// Categories named in each grounding prompt chunk.
    #[serde(default = "default_class_len_per_prompt")]
    pub class_len_per_prompt: usize,
    /// Size of the shared category index space.
    #[serde(default = "default_num_categories")]
    pub num_categories: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Class index the closed-set detector uses for "none of my classes".
    #[serde(default = "default_background_class_id")]
    pub background_class_id: u32,
    #[serde(default = "default_max_dets_per_image")]
    pub max_dets_per_image: usize,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_max_warmup")]
    pub max_warmup: usize,
    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: u64,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Dataset category ids of the known subset.
    #[serde(default)]
    pub known_class_ids: Vec<u64>,
}

impl Default for NodConfig {
    fn default() -> Self {
        NodConfig {
            class_len_per_prompt: default_class_len_per_prompt(),
            num_categories: default_num_categories(),
            top_k: default_top_k(),
            background_class_id: default_background_class_id(),
            max_dets_per_image: default_max_dets_per_image(),
            checkpoint_interval: default_checkpoint_interval(),
            max_warmup: default_max_warmup(),
            log_interval_secs: default_log_interval_secs(),
            out_dir: default_out_dir(),
            known_class_ids: Vec::new(),
        }
    }
}

impl NodConfig {
    /// Load a params file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: NodConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(NodError::InvalidConfig(
                "checkpoint_interval must be positive".into(),
            ));
        }
        if self.max_dets_per_image == 0 {
            return Err(NodError::InvalidConfig(
                "max_dets_per_image must be positive".into(),
            ));
        }
        self.fusion_config().map(|_| ())
    }

    pub fn fusion_config(&self) -> Result<FusionConfig> {
        FusionConfig::new(self.top_k, self.class_len_per_prompt, self.num_categories)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_warmup: self.max_warmup,
            log_interval: Duration::from_secs(self.log_interval_secs),
            checkpoint_interval: self.checkpoint_interval,
            checkpoint_dir: Some(self.out_dir.clone()),
        }
    }
}
