//! File-based configuration shared by the CLI and embedding hosts.
//!
//! ```json
//! {
//!   "instrument": { "hook_variable_name": "__rt", "linkage": "require" },
//!   "checks": { "W6": "ignore" },
//!   "runtime_path": "vendor/jsane-runtime.js"
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{JsaneError, Result};
use crate::instrument::{InstrumentOptions, LinkageMode};
use crate::runtime::CheckConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsaneConfig {
    pub instrument: InstrumentOptions,
    /// Per-check severity overrides.
    pub checks: CheckConfig,
    /// Runtime library source embedded under [`LinkageMode::Embed`].
    pub runtime_path: Option<PathBuf>,
}

impl JsaneConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| JsaneError::Config(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| JsaneError::Config(format!("cannot read {}: {err}", path.display())))?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| JsaneError::Config(err.to_string()))
    }

    /// Instrumentation options with the runtime source read in when the
    /// linkage embeds it.
    pub fn resolved_instrument_options(&self) -> Result<InstrumentOptions> {
        let mut options = self.instrument.clone();
        if options.linkage == LinkageMode::Embed && options.runtime_source.is_none() {
            let path = self
                .runtime_path
                .as_ref()
                .ok_or_else(|| JsaneError::Config("embed linkage needs runtime_path".to_string()))?;
            let source = std::fs::read_to_string(path)
                .map_err(|err| JsaneError::Config(format!("cannot read {}: {err}", path.display())))?;
            options.runtime_source = Some(source);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::{CheckKind, Severity};

    #[test]
    fn test_defaults() {
        let config = JsaneConfig::from_json_str("{}").unwrap();
        assert_eq!(config, JsaneConfig::default());
        assert_eq!(config.instrument.hook_variable_name, "__rt");
        assert_eq!(config.checks.severity(CheckKind::NotCallable), Severity::Error);
    }

    #[test]
    fn test_partial_file() {
        let config = JsaneConfig::from_json_str(
            r#"{"instrument": {"hook_variable_name": "R", "linkage": "assume_preexisting"}, "checks": {"W1": "ignore"}}"#,
        )
        .unwrap();
        assert_eq!(config.instrument.hook_variable_name, "R");
        assert_eq!(config.instrument.linkage, LinkageMode::AssumePreexisting);
        assert_eq!(config.instrument.module_name, "jsane");
        assert_eq!(config.checks.severity(CheckKind::HiddenBadOperand), Severity::Ignore);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(JsaneConfig::from_json_str("{"), Err(JsaneError::Config(_))));
        assert!(matches!(
            JsaneConfig::from_json_str(r#"{"checks": {"W9": "warn"}}"#),
            Err(JsaneError::Config(_))
        ));
    }

    #[test]
    fn test_load_and_embed_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_path = dir.path().join("runtime.js");
        std::fs::write(&runtime_path, "exports.runtime = {};").unwrap();

        let config_path = dir.path().join("jsane.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"{{"instrument": {{"linkage": "embed"}}, "runtime_path": {}}}"#,
            serde_json::to_string(&runtime_path).unwrap()
        )
        .unwrap();

        let config = JsaneConfig::load(&config_path).unwrap();
        let options = config.resolved_instrument_options().unwrap();
        assert_eq!(options.runtime_source.as_deref(), Some("exports.runtime = {};"));

        let round_trip = JsaneConfig::from_json_str(&config.to_json_pretty().unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }

    #[test]
    fn test_missing_file() {
        let err = JsaneConfig::load(Path::new("/nonexistent/jsane.json")).unwrap_err();
        assert!(err.to_string().starts_with("Configuration error: cannot read"));
    }
}
