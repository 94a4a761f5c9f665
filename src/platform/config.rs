// LogQuest - platform/config.rs
//
// Platform-specific configuration, data directory resolution, and config.toml
// loading with startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::platform::local_engine::EngineConfig;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Resolved platform paths for LogQuest data and configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logquest/)
    pub config_dir: PathBuf,

    /// Data directory holding the local spaces.
    pub data_dir: PathBuf,

    /// Default root of the local engine's spaces (`<data_dir>/spaces`).
    pub spaces_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let data_dir = proj_dirs.data_dir().to_path_buf();
            let spaces_dir = data_dir.join(constants::SPACES_DIR_NAME);

            tracing::debug!(
                config = %config_dir.display(),
                data = %data_dir.display(),
                spaces = %spaces_dir.display(),
                "Platform paths resolved"
            );

            Self {
                config_dir,
                data_dir,
                spaces_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            let fallback = PathBuf::from(".");
            Self {
                config_dir: fallback.clone(),
                spaces_dir: fallback.join(constants::SPACES_DIR_NAME),
                data_dir: fallback,
            }
        }
    }

    /// Default location of config.toml.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility -- a newer
/// config file can be used with an older binary without crashing.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[engine]` section.
    pub engine: EngineSection,
    /// `[search]` section.
    pub search: SearchSection,
    /// `[logging]` section.
    pub logging: LoggingSection,
}

/// `[engine]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Root directory of the local spaces.
    pub spaces_dir: Option<String>,
    /// Maximum directory recursion depth inside a space.
    pub max_depth: Option<usize>,
    /// Maximum files searched per space.
    pub max_files: Option<usize>,
    /// Matched tuples per results chunk.
    pub tuple_batch_size: Option<usize>,
    /// Include glob patterns.
    pub include_patterns: Option<Vec<String>>,
    /// Exclude glob patterns.
    pub exclude_patterns: Option<Vec<String>>,
}

/// `[search]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Span used when a search gives no `--from`.
    pub default_span_hours: Option<i64>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Engine --
    /// Spaces root override; `None` means the platform default.
    pub spaces_dir: Option<PathBuf>,
    pub max_depth: usize,
    pub max_files: usize,
    pub tuple_batch_size: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,

    // -- Search --
    pub default_span_hours: i64,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            spaces_dir: None,
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::DEFAULT_MAX_FILES,
            tuple_batch_size: constants::DEFAULT_TUPLE_BATCH_SIZE,
            include_patterns: to_strings(constants::DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: to_strings(constants::DEFAULT_EXCLUDE_PATTERNS),
            default_span_hours: constants::DEFAULT_SPAN_HOURS,
            log_level: None,
        }
    }
}

impl AppConfig {
    /// Engine settings, resolving the spaces root against `paths`.
    pub fn engine_config(&self, paths: &PlatformPaths) -> EngineConfig {
        EngineConfig {
            spaces_dir: self
                .spaces_dir
                .clone()
                .unwrap_or_else(|| paths.spaces_dir.clone()),
            max_depth: self.max_depth,
            max_files: self.max_files,
            tuple_batch_size: self.tuple_batch_size,
            include_patterns: self.include_patterns.clone(),
            exclude_patterns: self.exclude_patterns.clone(),
            large_file_threshold: constants::LARGE_FILE_THRESHOLD,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Load and validate `config.toml` from the given config directory.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// If the file does not exist, returns defaults with no warnings (first-run).
/// If the file is unreadable or unparseable, returns defaults with a warning
/// so the application still starts but the user is informed.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<String>) {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    match load_config_file(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}

/// Load and validate an explicitly named config file.
///
/// Unlike `load_config`, a missing or malformed file is an error: the user
/// asked for this file by name.
pub fn load_config_file(path: &Path) -> Result<(AppConfig, Vec<String>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(path = %path.display(), "Loaded config.toml");
    Ok(validate(raw))
}

fn out_of_range(
    field: &str,
    value: impl ToString,
    expected: String,
    default: impl std::fmt::Display,
) -> String {
    let err = ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    };
    format!("{err}. Using default ({default}).")
}

/// Validate each field against named constants, accumulating all problems.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut config = AppConfig::default();
    let mut warnings: Vec<String> = Vec::new();

    // -- Engine: spaces_dir --
    if let Some(dir) = raw.engine.spaces_dir {
        if dir.trim().is_empty() {
            warnings.push(
                "[engine] spaces_dir is empty. Using the platform data directory.".to_string(),
            );
        } else {
            config.spaces_dir = Some(PathBuf::from(dir));
        }
    }

    // -- Engine: max_depth --
    if let Some(depth) = raw.engine.max_depth {
        if (1..=constants::ABSOLUTE_MAX_DEPTH).contains(&depth) {
            config.max_depth = depth;
        } else {
            warnings.push(out_of_range(
                "engine.max_depth",
                depth,
                format!("1-{}", constants::ABSOLUTE_MAX_DEPTH),
                constants::DEFAULT_MAX_DEPTH,
            ));
        }
    }

    // -- Engine: max_files --
    if let Some(files) = raw.engine.max_files {
        if (constants::MIN_MAX_FILES..=constants::ABSOLUTE_MAX_FILES).contains(&files) {
            config.max_files = files;
        } else {
            warnings.push(out_of_range(
                "engine.max_files",
                files,
                format!("{}-{}", constants::MIN_MAX_FILES, constants::ABSOLUTE_MAX_FILES),
                constants::DEFAULT_MAX_FILES,
            ));
        }
    }

    // -- Engine: tuple_batch_size --
    if let Some(size) = raw.engine.tuple_batch_size {
        if (constants::MIN_TUPLE_BATCH_SIZE..=constants::MAX_TUPLE_BATCH_SIZE).contains(&size) {
            config.tuple_batch_size = size;
        } else {
            warnings.push(out_of_range(
                "engine.tuple_batch_size",
                size,
                format!(
                    "{}-{}",
                    constants::MIN_TUPLE_BATCH_SIZE,
                    constants::MAX_TUPLE_BATCH_SIZE
                ),
                constants::DEFAULT_TUPLE_BATCH_SIZE,
            ));
        }
    }

    // -- Engine: glob patterns --
    if let Some(patterns) = raw.engine.include_patterns {
        config.include_patterns = checked_globs("include_patterns", patterns, &mut warnings);
    }
    if let Some(patterns) = raw.engine.exclude_patterns {
        config.exclude_patterns = checked_globs("exclude_patterns", patterns, &mut warnings);
    }

    // -- Search: default_span_hours --
    if let Some(hours) = raw.search.default_span_hours {
        if (constants::MIN_SPAN_HOURS..=constants::MAX_SPAN_HOURS).contains(&hours) {
            config.default_span_hours = hours;
        } else {
            warnings.push(out_of_range(
                "search.default_span_hours",
                hours,
                format!("{}-{}", constants::MIN_SPAN_HOURS, constants::MAX_SPAN_HOURS),
                constants::DEFAULT_SPAN_HOURS,
            ));
        }
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default ({}).",
                constants::DEFAULT_LOG_LEVEL,
            ));
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

/// Keep the patterns that compile as globs; warn about the rest.
fn checked_globs(field: &str, patterns: Vec<String>, warnings: &mut Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .filter(|p| match glob::Pattern::new(p) {
            Ok(_) => true,
            Err(e) => {
                warnings.push(format!(
                    "[engine] {field}: \"{p}\" is not a valid glob ({e}). Pattern ignored."
                ));
                false
            }
        })
        .collect()
}
