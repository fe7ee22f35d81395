/// Search budget configuration loaded from TOML (`[search]`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SearchConfig {
    /// Maximum oracle calls per resolution run. Unlimited when absent.
    #[serde(default)]
    pub max_tries: Option<u32>,

    /// Wall-clock limit in seconds for the whole experiment, measured from
    /// when the driver starts. Unlimited when absent.
    #[serde(default)]
    pub max_time_secs: Option<u64>,

    /// Emit a progress event every this many tries (0 disables).
    #[serde(default = "default_report_every")]
    pub report_every: u32,
}

fn default_report_every() -> u32 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_tries: None,
            max_time_secs: None,
            report_every: default_report_every(),
        }
    }
}

impl SearchConfig {
    /// Log a warning for budgets that make the search pointless.
    pub fn validate(&self) {
        if self.max_tries == Some(0) {
            tracing::warn!("max_tries = 0: every choice will be forced conservative");
        }
        if self.max_time_secs == Some(0) {
            tracing::warn!("max_time_secs = 0: every choice will be forced conservative");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_config() {
        let toml_str = r#"
            max_tries = 200
            max_time_secs = 3600
            report_every = 25
        "#;
        let config: SearchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_tries, Some(200));
        assert_eq!(config.max_time_secs, Some(3600));
        assert_eq!(config.report_every, 25);
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: SearchConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_tries, None);
        assert_eq!(config.max_time_secs, None);
        assert_eq!(config.report_every, 10);
    }

    #[test]
    fn test_default_matches_serde_defaults() {
        let from_toml: SearchConfig = toml::from_str("").unwrap();
        let default = SearchConfig::default();
        assert_eq!(from_toml.max_tries, default.max_tries);
        assert_eq!(from_toml.report_every, default.report_every);
    }
}
