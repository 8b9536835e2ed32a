//! qbscript engine configuration
//!
//! Loads evaluation budgets and logging options from a plain `key = value`
//! options file.

use qbscript_core::EngineError;
use std::fs;
use std::path::Path;

/// Default location of the options file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/qbscript.txt";

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum nested user-function calls per run (from "maxcalldepth")
    pub max_call_depth: usize,
    /// Maximum `for` iterations across one run (from "maxloopiterations")
    pub max_loop_iterations: u64,
    /// Maximum parsed programs kept by the AST cache (from "astcachecapacity")
    pub ast_cache_capacity: usize,
    /// Maximum scripts re-run by one recompute cascade (from "maxcascadepasses")
    pub max_cascade_passes: usize,
    /// Default tracing filter (from "loglevel")
    pub log_level: String,
    /// Mirror script `log(...)` calls to tracing (from "consolelog")
    pub console_log: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 128,
            max_loop_iterations: 1_000_000,
            ast_cache_capacity: 512,
            max_cascade_passes: 256,
            log_level: "info".into(),
            console_log: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an options file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from [`DEFAULT_CONFIG_PATH`], falling back to
    /// defaults when the file is missing
    pub fn load_default() -> Self {
        match Self::load_from_file(DEFAULT_CONFIG_PATH) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default engine config ({})", e);
                Self::default()
            }
        }
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Result<Self, EngineError> {
        let mut config = Self::default();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(EngineError::Config(format!(
                    "line {}: expected key = value, got '{}'",
                    line_num + 1,
                    line
                )));
            };

            let key = line[..eq_pos].trim();
            let value = line[eq_pos + 1..].trim();
            config.parse_option(key, value);
        }

        if config.max_call_depth == 0 {
            return Err(EngineError::Config("maxcalldepth must be at least 1".into()));
        }

        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key.to_lowercase().as_str() {
            "maxcalldepth" => {
                self.max_call_depth = value.parse().unwrap_or(128);
            }
            "maxloopiterations" => {
                self.max_loop_iterations = value.parse().unwrap_or(1_000_000);
            }
            "astcachecapacity" => {
                self.ast_cache_capacity = value.parse().unwrap_or(512);
            }
            "maxcascadepasses" => {
                self.max_cascade_passes = value.parse().unwrap_or(256);
            }
            "loglevel" => self.log_level = value.into(),
            "consolelog" => {
                self.console_log = value.parse().unwrap_or(true);
            }
            _ => {
                tracing::debug!("Unknown config option: {} = {}", key, value);
            }
        }
    }

    /// Display configuration summary
    pub fn display(&self) {
        tracing::info!("Engine configuration:");
        tracing::info!("    Max call depth: {}", self.max_call_depth);
        tracing::info!("    Max loop iterations: {}", self.max_loop_iterations);
        tracing::info!("    AST cache capacity: {}", self.ast_cache_capacity);
        tracing::info!("    Max cascade passes: {}", self.max_cascade_passes);
        tracing::info!("    Log level: {}", self.log_level);
        tracing::info!("    Console log: {}", self.console_log);
    }
}
