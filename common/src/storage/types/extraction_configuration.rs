use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named extraction configuration as stored in `extract-<name>.json`.
///
/// Keys other than the ones named here are kept in `options` and merged into
/// the extraction command's option set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfiguration {
    pub extract_name: String,
    /// Title of the command definition that performs the extraction.
    pub extract_cmd: String,
    /// Directory whose direct children are candidates for extraction.
    #[serde(default)]
    pub loadpath: Option<String>,
    /// Regular expression a file name must match to be selected.
    #[serde(default)]
    pub loadregs: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ExtractionConfiguration {
    /// All keys of the configuration as one option map.
    pub fn as_options(&self) -> Map<String, Value> {
        let mut options = self.options.clone();
        options.insert("extract_name".into(), Value::String(self.extract_name.clone()));
        options.insert("extract_cmd".into(), Value::String(self.extract_cmd.clone()));
        if let Some(loadpath) = &self.loadpath {
            options.insert("loadpath".into(), Value::String(loadpath.clone()));
        }
        if let Some(loadregs) = &self.loadregs {
            options.insert("loadregs".into(), Value::String(loadregs.clone()));
        }
        options
    }
}
