//! Pipeline configuration loaded from a YAML file.
//!
//! The configuration is parsed and validated once at startup and then
//! shared as `Arc<PipelineConfig>`. No stage mutates it.
//!
//! | Key                                | Default                   |
//! |------------------------------------|---------------------------|
//! | `algorithm.num_cores`              | `1`                       |
//! | `algorithm.empty_sample_policy`    | `warn`                    |
//! | `distributed.queue_url`            | `redis://127.0.0.1:6379`  |
//! | `distributed.queue_name`           | `seqrun`                  |
//! | `distributed.reply_timeout_secs`   | none (wait indefinitely)  |
//! | `stages.<name>.timeout_secs`       | `86400`                   |

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

/// Literal `num_cores` value selecting distributed execution.
pub const MESSAGING_MODE: &str = "messaging";

/// Environment variable overriding `distributed.queue_url`.
pub const QUEUE_URL_ENV: &str = "SEQRUN_QUEUE_URL";

const DEFAULT_QUEUE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_QUEUE_NAME: &str = "seqrun";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub algorithm: AlgorithmConfig,

    /// Base URL of the remote lab metadata service.
    #[serde(default)]
    pub galaxy_url: Option<String>,

    #[serde(default)]
    pub galaxy_api_key: Option<String>,

    #[serde(default)]
    pub distributed: DistributedConfig,

    /// External programs implementing each registered stage.
    #[serde(default)]
    pub stages: BTreeMap<String, StageProgram>,

    #[serde(default, alias = "gdocs_upload")]
    pub upload: Option<UploadConfig>,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&text)?;
        if let Ok(url) = std::env::var(QUEUE_URL_ENV) {
            config.distributed.queue_url = url;
        }
        tracing::debug!(path = %path.display(), parallelism = %config.algorithm.num_cores, "Loaded pipeline configuration");
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(text: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.algorithm.num_cores == Parallelism::Messaging
            && self.distributed.queue_name.trim().is_empty()
        {
            return Err(PipelineError::Config(
                "distributed.queue_name must not be empty in messaging mode".to_string(),
            ));
        }
        for (name, stage) in &self.stages {
            if stage.program.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "stages.{name}.program must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Look up the external program configured for `stage`.
    pub fn stage_program(&self, stage: &str) -> Result<&StageProgram, PipelineError> {
        self.stages.get(stage).ok_or_else(|| {
            PipelineError::Config(format!("no program configured for stage '{stage}'"))
        })
    }

    /// Credentials for the remote metadata service, if both are set.
    pub fn metadata_service(&self) -> Option<(&str, &str)> {
        match (self.galaxy_url.as_deref(), self.galaxy_api_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() => Some((url, key)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// algorithm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(default)]
    pub num_cores: Parallelism,

    #[serde(default)]
    pub empty_sample_policy: EmptySamplePolicy,
}

/// How a stage's work items are executed, from `algorithm.num_cores`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Bounded local pool of exactly this many workers.
    Local(NonZeroUsize),
    /// Shipped over the message queue to remote workers.
    Messaging,
}

impl Default for Parallelism {
    fn default() -> Self {
        Self::Local(NonZeroUsize::MIN)
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(n) => write!(f, "{n}"),
            Self::Messaging => f.write_str(MESSAGING_MODE),
        }
    }
}

impl std::str::FromStr for Parallelism {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(MESSAGING_MODE) {
            return Ok(Self::Messaging);
        }
        let n: usize = s.parse().map_err(|_| {
            PipelineError::Config(format!(
                "algorithm.num_cores must be a positive integer or '{MESSAGING_MODE}', got '{s}'"
            ))
        })?;
        NonZeroUsize::new(n)
            .map(Self::Local)
            .ok_or_else(|| PipelineError::Config("algorithm.num_cores must be at least 1".into()))
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Int(n) => n.to_string(),
            Raw::Str(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Parallelism {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Local(n) => serializer.serialize_u64(n.get() as u64),
            Self::Messaging => serializer.serialize_str(MESSAGING_MODE),
        }
    }
}

/// What to do when a sample ends up with zero lane results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySamplePolicy {
    /// Record a diagnostic in the run report and continue.
    #[default]
    Warn,
    /// Abort the run before the sample stage.
    Fail,
}

// ---------------------------------------------------------------------------
// distributed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    #[serde(default = "default_queue_url")]
    pub queue_url: String,

    /// Prefix for the task list and reply lists.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Give up on a stage after this long without receiving any reply.
    #[serde(default)]
    pub reply_timeout_secs: Option<u64>,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            queue_url: default_queue_url(),
            queue_name: default_queue_name(),
            reply_timeout_secs: None,
        }
    }
}

fn default_queue_url() -> String {
    DEFAULT_QUEUE_URL.to_string()
}

fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

// ---------------------------------------------------------------------------
// stages
// ---------------------------------------------------------------------------

/// External program that carries out the domain work of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgram {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_stage_timeout() -> u64 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// upload / analysis
// ---------------------------------------------------------------------------

/// External summary upload integration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default, alias = "gdocs_upload_script")]
    pub upload_script: Option<String>,

    #[serde(default, alias = "gdocs_dmplx_file")]
    pub destination_file: Option<String>,

    #[serde(default, alias = "gdocs_credentials")]
    pub credentials: Option<String>,

    /// Spreadsheet service endpoint used by the demultiplex report writer.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default, alias = "gdocs_projects_folder")]
    pub projects_folder: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub base_dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    // -- num_cores ------------------------------------------------------------

    #[test]
    fn integer_num_cores_selects_local_pool() {
        let config = PipelineConfig::from_yaml("algorithm:\n  num_cores: 4\n").expect("parse");
        assert_eq!(
            config.algorithm.num_cores,
            Parallelism::Local(NonZeroUsize::new(4).expect("non-zero"))
        );
    }

    #[test]
    fn numeric_string_num_cores_is_accepted() {
        let config = PipelineConfig::from_yaml("algorithm:\n  num_cores: '8'\n").expect("parse");
        assert_eq!(config.algorithm.num_cores.to_string(), "8");
    }

    #[test]
    fn messaging_selects_distributed_mode_case_insensitively() {
        let config =
            PipelineConfig::from_yaml("algorithm:\n  num_cores: Messaging\n").expect("parse");
        assert_eq!(config.algorithm.num_cores, Parallelism::Messaging);
    }

    #[test]
    fn zero_cores_rejected() {
        let result = PipelineConfig::from_yaml("algorithm:\n  num_cores: 0\n");
        assert_matches!(result, Err(PipelineError::Config(_)));
    }

    #[test]
    fn garbage_num_cores_rejected() {
        let result = PipelineConfig::from_yaml("algorithm:\n  num_cores: lots\n");
        assert_matches!(result, Err(PipelineError::Config(_)));
    }

    #[test]
    fn missing_algorithm_defaults_to_single_worker() {
        let config = PipelineConfig::from_yaml("galaxy_url: http://lims\n").expect("parse");
        assert_eq!(config.algorithm.num_cores, Parallelism::default());
        assert_eq!(config.algorithm.empty_sample_policy, EmptySamplePolicy::Warn);
    }

    // -- upload section -------------------------------------------------------

    #[test]
    fn legacy_gdocs_keys_are_aliases() {
        let yaml = "\
gdocs_upload:
  gdocs_upload_script: /opt/upload.py
  gdocs_dmplx_file: Demultiplex counts
  gdocs_credentials: c2VjcmV0
analysis:
  base_dir: /data/analysis
";
        let config = PipelineConfig::from_yaml(yaml).expect("parse");
        let upload = config.upload.expect("upload section");
        assert_eq!(upload.upload_script.as_deref(), Some("/opt/upload.py"));
        assert_eq!(upload.destination_file.as_deref(), Some("Demultiplex counts"));
        assert_eq!(upload.credentials.as_deref(), Some("c2VjcmV0"));
        assert_eq!(config.analysis.base_dir.as_deref(), Some("/data/analysis"));
    }

    // -- stages ---------------------------------------------------------------

    #[test]
    fn stage_program_defaults_timeout() {
        let yaml = "stages:\n  process_lane:\n    program: /bin/true\n";
        let config = PipelineConfig::from_yaml(yaml).expect("parse");
        let stage = config.stage_program("process_lane").expect("configured");
        assert_eq!(stage.timeout_secs, DEFAULT_STAGE_TIMEOUT_SECS);
        assert!(stage.args.is_empty());
    }

    #[test]
    fn missing_stage_program_is_config_error() {
        let config = PipelineConfig::default();
        assert_matches!(
            config.stage_program("process_sample"),
            Err(PipelineError::Config(_))
        );
    }

    #[test]
    fn empty_stage_program_rejected() {
        let yaml = "stages:\n  process_lane:\n    program: ''\n";
        assert_matches!(
            PipelineConfig::from_yaml(yaml),
            Err(PipelineError::Config(_))
        );
    }

    #[test]
    fn metadata_service_requires_url_and_key() {
        let mut config = PipelineConfig {
            galaxy_url: Some("http://lims".into()),
            ..Default::default()
        };
        assert!(config.metadata_service().is_none());
        config.galaxy_api_key = Some("key".into());
        assert_eq!(config.metadata_service(), Some(("http://lims", "key")));
    }
}
