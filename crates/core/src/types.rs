//! Run description data model and the opaque dispatch payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Flowcell identity parsed from a run directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowcellId {
    /// Flowcell barcode, e.g. `FC70BUKAAXX`.
    pub name: String,
    /// Six-digit run date, e.g. `110106`.
    pub date: String,
}

impl FlowcellId {
    pub fn new(name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            date: date.into(),
        }
    }

    /// The `<date>_<name>` label used for worksheet titles and file prefixes.
    pub fn label(&self) -> String {
        format!("{}_{}", self.date, self.name)
    }

    /// File prefix for one lane, e.g. `1_110106_FC70BUKAAXX`.
    pub fn lane_prefix(&self, lane: &str) -> String {
        format!("{lane}_{}_{}", self.date, self.name)
    }
}

/// A resolved sequencing run. Immutable once produced by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub flowcell: FlowcellId,
    /// Identifier assigned by the remote metadata source, empty for manifests.
    #[serde(default)]
    pub run_id: String,
    pub lanes: Vec<LaneInfo>,
}

/// One physical lane as described by a manifest or the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneInfo {
    #[serde(deserialize_with = "string_or_int")]
    pub lane: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub genome_build: String,
    #[serde(default, rename = "multiplex", alias = "barcodes")]
    pub barcodes: Vec<BarcodeEntry>,
}

impl LaneInfo {
    /// Sample identifier for a lane that is not multiplexed.
    pub fn default_sample(&self) -> String {
        self.name
            .as_deref()
            .or(self.description.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("lane{}", self.lane))
    }
}

/// One barcode carried by a multiplexed lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeEntry {
    #[serde(deserialize_with = "string_or_int")]
    pub barcode_id: String,
    #[serde(default)]
    pub barcode_type: Option<String>,
    /// Sample identifier.
    #[serde(default)]
    pub name: String,
    /// Nucleotide sequence, or an Illumina index name before normalisation.
    #[serde(default)]
    pub sequence: String,
    /// Overrides the lane's reference genome when present.
    #[serde(default)]
    pub genome_build: Option<String>,
    #[serde(default, rename = "sample_prj", alias = "project")]
    pub project: Option<String>,
}

/// Opaque unit of dispatchable work.
///
/// The dispatcher never looks inside the payload; stage functions decode it
/// into their own typed input with [`WorkItem::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(pub serde_json::Value);

impl WorkItem {
    /// Wrap a typed payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self)
    }

    /// Decode the payload into a typed stage input.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for WorkItem {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Accept YAML/JSON scalars written either as numbers or strings.
pub(crate) fn string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Int(i64),
        Str(String),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Int(n) => n.to_string(),
        Scalar::Str(s) => s,
    })
}
