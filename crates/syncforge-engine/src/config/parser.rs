//! Sync configuration YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::SyncConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced environment variable that is
/// not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();

    let substituted = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(substituted.into_owned())
}

/// Parse a sync configuration YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<SyncConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: SyncConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse sync config YAML")?;
    Ok(config)
}

/// Parse a sync configuration YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SF_TEST_ERP_PATH", "/data/erp.db");
        let input = "path: ${SF_TEST_ERP_PATH}\ntable: items";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("/data/erp.db"));
        assert!(!result.contains("${SF_TEST_ERP_PATH}"));
        std::env::remove_var("SF_TEST_ERP_PATH");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("SF_TEST_A", "alpha");
        std::env::set_var("SF_TEST_B", "beta");
        let input = "${SF_TEST_A} and ${SF_TEST_B} and ${SF_TEST_A}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "alpha and beta and alpha");
        std::env::remove_var("SF_TEST_A");
        std::env::remove_var("SF_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "table: items\npage_size: 100";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${SF_MISSING_X} and ${SF_MISSING_Y} and ${SF_MISSING_X}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("SF_MISSING_X"));
        assert!(err_msg.contains("SF_MISSING_Y"));
        assert_eq!(err_msg.matches("SF_MISSING_X").count(), 1);
    }

    #[test]
    fn test_parse_config_from_string() {
        std::env::set_var("SF_TEST_LEGACY_DB", "/srv/legacy.db");
        let yaml = r#"
version: "1.0"
mappings:
  - entity_type: product
    source:
      name: legacy_erp
      extractor: sqlite_table
      config:
        path: ${SF_TEST_LEGACY_DB}
        table: items
    loader:
      use: sqlite_table
      destination: products
      unique_field: sku
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.mappings[0].source.config["path"], "/srv/legacy.db");
        std::env::remove_var("SF_TEST_LEGACY_DB");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_parse_config_file_not_found() {
        let err_msg = parse_config(Path::new("/nonexistent/sync.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Failed to read config file"));
    }
}
