//! Pipeline configuration loading.
//!
//! Files ending in `.json` are parsed as JSON; everything else as TOML. Every
//! field has a default, so an empty file yields [`PipelineConfig::default()`].
//! The loaded config is validated before it is returned.

use std::path::Path;

use mathweave_types::config::PipelineConfig;
use mathweave_types::{PipelineError, Result};
use tracing::debug;

/// Parse a config document. `format_hint` is a file extension.
pub fn parse_config(content: &str, format_hint: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = if format_hint.eq_ignore_ascii_case("json") {
        serde_json::from_str(content)?
    } else {
        toml::from_str(content).map_err(|e| PipelineError::ConfigInvalid {
            reason: format!("toml: {e}"),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate the config at `path`. A missing file is an error.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    debug!(path = %path.display(), "loading pipeline config");
    parse_config(&content, ext)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<PipelineConfig> {
    if path.exists() {
        load_config(path)
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        Ok(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_is_default() {
        let config = parse_config("", "toml").unwrap();
        assert_eq!(config.verification.ensemble_size, 3);
        assert_eq!(config.escalation.max_escalations, 5);
    }

    #[test]
    fn json_with_camel_case_keys() {
        let config = parse_config(
            r#"{"verification": {"ensembleSize": 5}, "retrieval": {"topK": 3}}"#,
            "json",
        )
        .unwrap();
        assert_eq!(config.verification.ensemble_size, 5);
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn even_ensemble_is_rejected() {
        let err = parse_config("[verification]\nensemble_size = 4\n", "toml").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid { .. }));
    }

    #[test]
    fn bad_toml_is_config_invalid() {
        let err = parse_config("[verification\n", "toml").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[routing]\nconfidence_threshold = 0.75").unwrap();
        let config = load_config(&path).unwrap();
        assert!((config.routing.confidence_threshold - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(&path).is_err());
        let config = load_config_or_default(&path).unwrap();
        assert_eq!(config.planning.max_replan_attempts, 2);
    }
}
