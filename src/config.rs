//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional `.s3sync.toml` in
//! the sync root, then command-line flags. The result is validated once and
//! handed to the engine as an immutable [`SyncConfig`].

use crate::conflict::ConflictPolicy;
use crate::error::ConfigError;
use crate::filter::ExcludeSet;
use crate::state::STATE_FILE_NAME;
use crate::types::{CHUNK_SIZE, MULTIPART_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the optional per-directory configuration file.
pub const CONFIG_FILE_NAME: &str = ".s3sync.toml";

const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub bucket: String,
    pub prefix: String,
    /// Local sync root.
    pub directory: PathBuf,
    /// User-supplied exclusion rules; built-ins are added by [`SyncConfig::exclude_set`].
    pub excludes: Vec<String>,
    pub dry_run: bool,
    pub progress: bool,
    pub verbose: bool,
    /// Skip the confirmation prompt.
    pub assume_yes: bool,
    pub multipart_threshold: u64,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub retries: usize,
    pub retry_delay: Duration,
    pub conflict_policy: ConflictPolicy,
    /// State file name, relative to `directory`.
    pub state_file: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl SyncConfig {
    /// A configuration with every tunable at its default.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            directory: directory.into(),
            excludes: Vec::new(),
            dry_run: false,
            progress: false,
            verbose: false,
            assume_yes: false,
            multipart_threshold: MULTIPART_THRESHOLD,
            chunk_size: CHUNK_SIZE,
            concurrency: 1,
            retries: 0,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            conflict_policy: ConflictPolicy::default(),
            state_file: STATE_FILE_NAME.to_string(),
            region: None,
            endpoint: None,
        }
    }

    /// Layers the config file in `directory` and `overrides` over the
    /// defaults, then validates the result.
    pub fn resolve(directory: impl Into<PathBuf>, overrides: Overrides) -> Result<Self, ConfigError> {
        let directory = directory.into();
        let mut config = Self::new(String::new(), String::new(), directory.clone());

        if let Some(file) = FileConfig::load(&directory.join(CONFIG_FILE_NAME))? {
            file.apply(&mut config);
        }
        overrides.apply(&mut config);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.bucket.trim().is_empty(), self.prefix.trim().is_empty()) {
            (true, true) => return Err(ConfigError::MissingBucketAndPrefix),
            (true, false) => return Err(ConfigError::MissingBucket),
            (false, true) => return Err(ConfigError::MissingPrefix),
            (false, false) => {}
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk size must be greater than zero".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.state_file.trim().is_empty() {
            return Err(ConfigError::Invalid("state file name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Absolute location of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.directory.join(&self.state_file)
    }

    /// User rules plus the config file, `.git` and the state file.
    pub fn exclude_set(&self) -> ExcludeSet {
        let mut set = ExcludeSet::new(&self.excludes);
        set.add(CONFIG_FILE_NAME);
        set.add(".git");
        let state_name = Path::new(&self.state_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.state_file.clone());
        set.add(&state_name);
        set
    }
}

/// Contents of `.s3sync.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    pub multipart_threshold: Option<u64>,
    pub chunk_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub conflict: Option<ConflictPolicy>,
    pub state_file: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl FileConfig {
    /// Reads `path` if it exists.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let parsed = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(Some(parsed))
    }

    fn apply(self, config: &mut SyncConfig) {
        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        config.excludes.extend(self.excludes);
        if let Some(threshold) = self.multipart_threshold {
            config.multipart_threshold = threshold;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(delay);
        }
        if let Some(policy) = self.conflict {
            config.conflict_policy = policy;
        }
        if let Some(state_file) = self.state_file {
            config.state_file = state_file;
        }
        if self.region.is_some() {
            config.region = self.region;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint;
        }
    }
}

/// Values given on the command line. `None` and `false` leave lower layers
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub excludes: Vec<String>,
    pub dry_run: bool,
    pub progress: bool,
    pub verbose: bool,
    pub assume_yes: bool,
    pub concurrency: Option<usize>,
    pub retries: Option<usize>,
    pub conflict: Option<ConflictPolicy>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut SyncConfig) {
        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        config.excludes.extend(self.excludes);
        config.dry_run |= self.dry_run;
        config.progress |= self.progress;
        config.verbose |= self.verbose;
        config.assume_yes |= self.assume_yes;
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(policy) = self.conflict {
            config.conflict_policy = policy;
        }
        if self.region.is_some() {
            config.region = self.region;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameters_are_named() {
        let dir = tempfile::tempdir().unwrap();

        let err = SyncConfig::resolve(dir.path(), Overrides::default()).unwrap_err();
        assert_eq!(err, ConfigError::MissingBucketAndPrefix);

        let err = SyncConfig::resolve(
            dir.path(),
            Overrides {
                prefix: Some("p".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingBucket);

        let err = SyncConfig::resolve(
            dir.path(),
            Overrides {
                bucket: Some("b".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingPrefix);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
bucket = "from-file"
prefix = "backups"
excludes = ["node_modules"]
concurrency = 4
conflict = "skip"
"#,
        )
        .unwrap();

        let config = SyncConfig::resolve(
            dir.path(),
            Overrides {
                bucket: Some("from-cli".to_string()),
                excludes: vec!["target".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.bucket, "from-cli");
        assert_eq!(config.prefix, "backups");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.conflict_policy, ConflictPolicy::Skip);
        assert_eq!(config.excludes, vec!["node_modules", "target"]);
        assert_eq!(config.multipart_threshold, 100_000_000);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "bucket = [").unwrap();

        let err = SyncConfig::resolve(dir.path(), Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let mut config = SyncConfig::new("b", "p", ".");
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_builtin_excludes() {
        let config = SyncConfig::new("b", "p", "/data");
        let excludes = config.exclude_set();

        assert!(excludes.matches_local(".git/HEAD"));
        assert!(excludes.matches_local(".state.json"));
        assert!(excludes.matches_local(CONFIG_FILE_NAME));
        assert!(!excludes.matches_local("src/main.rs"));
        assert_eq!(config.state_path(), PathBuf::from("/data/.state.json"));
    }
}
