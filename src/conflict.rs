//! Conflict resolution for items changed on both sides since the last sync.

use crate::error::{ConfigError, SyncError};
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CONFLICT_PROMPT: &str = "Choose conflict resolution (local/remote/skip): ";

/// How conflicts are settled when they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Ask on the terminal for each conflict.
    #[default]
    Prompt,
    /// Always upload the local copy.
    Local,
    /// Always download the remote copy.
    Remote,
    /// Leave both sides untouched.
    Skip,
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(Self::Prompt),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "skip" => Ok(Self::Skip),
            other => Err(ConfigError::Invalid(format!(
                "unknown conflict policy '{}' (expected prompt, local, remote or skip)",
                other
            ))),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prompt => "prompt",
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Skip => "skip",
        };
        f.write_str(name)
    }
}

/// Outcome chosen for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    Skip,
}

impl Resolution {
    /// Parses a typed answer. Anything unrecognized is `None`.
    pub fn parse_choice(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::KeepLocal),
            "remote" => Some(Self::KeepRemote),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Both sides of one conflicting item.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub relative_path: String,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
}

impl Conflict {
    fn describe(time: Option<DateTime<Utc>>) -> String {
        time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Source of interactive answers.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Shows `question` and returns the raw answer line.
    async fn ask(&self, question: &str) -> Result<String, SyncError>;
}

/// Reads answers from the process's standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn ask(&self, question: &str) -> Result<String, SyncError> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            stdout.write_all(question.as_bytes())?;
            stdout.flush()?;

            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| SyncError::IoError(std::io::Error::other(format!("Task join error: {}", e))))?
    }
}

/// Applies the configured policy, asking through the prompter when needed.
///
/// Prompts are serialized so concurrent transfers never interleave questions.
pub struct ConflictResolver {
    policy: ConflictPolicy,
    prompter: Arc<dyn Prompter>,
    turn: Mutex<()>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            policy,
            prompter,
            turn: Mutex::new(()),
        }
    }

    pub async fn resolve(
        &self,
        conflict: &Conflict,
        out: &ProgressReporter,
    ) -> Result<Resolution, SyncError> {
        let _turn = self.turn.lock().await;

        out.println(format!(
            "Conflict detected: {} has been modified both locally and remotely.",
            conflict.relative_path
        ));
        out.println(format!(
            "Local last modified: {}",
            Conflict::describe(conflict.local_modified)
        ));
        out.println(format!(
            "Remote last modified: {}",
            Conflict::describe(conflict.remote_modified)
        ));

        let resolution = match self.policy {
            ConflictPolicy::Local => Resolution::KeepLocal,
            ConflictPolicy::Remote => Resolution::KeepRemote,
            ConflictPolicy::Skip => Resolution::Skip,
            ConflictPolicy::Prompt => {
                let answer = self.prompter.ask(CONFLICT_PROMPT).await?;
                match Resolution::parse_choice(&answer) {
                    Some(resolution) => resolution,
                    None => {
                        warn!("Unrecognized conflict answer '{}' for {}", answer, conflict.relative_path);
                        out.println("Invalid resolution choice. Skipping conflict file.");
                        return Ok(Resolution::Skip);
                    }
                }
            }
        };

        match resolution {
            Resolution::KeepLocal => out.println(format!(
                "Uploading local version of {}",
                conflict.relative_path
            )),
            Resolution::KeepRemote => out.println(format!(
                "Downloading remote version of {}",
                conflict.relative_path
            )),
            Resolution::Skip => out.println(format!(
                "Skipping conflict file: {}",
                conflict.relative_path
            )),
        }
        debug!("Resolved conflict on {} as {:?}", conflict.relative_path, resolution);
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct Scripted(StdMutex<VecDeque<String>>);

    #[async_trait]
    impl Prompter for Scripted {
        async fn ask(&self, _question: &str) -> Result<String, SyncError> {
            Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn conflict() -> Conflict {
        Conflict {
            relative_path: "notes.txt".to_string(),
            local_modified: Some(Utc::now()),
            remote_modified: None,
        }
    }

    fn scripted(answers: &[&str]) -> Arc<dyn Prompter> {
        Arc::new(Scripted(StdMutex::new(
            answers.iter().map(|a| a.to_string()).collect(),
        )))
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("LOCAL".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Local);
        assert_eq!("prompt".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Prompt);
        assert!("newest".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::Remote.to_string(), "remote");
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!(Resolution::parse_choice(" Remote\n"), Some(Resolution::KeepRemote));
        assert_eq!(Resolution::parse_choice("skip"), Some(Resolution::Skip));
        assert_eq!(Resolution::parse_choice("both"), None);
    }

    #[tokio::test]
    async fn test_prompted_answer_is_used() {
        let resolver = ConflictResolver::new(ConflictPolicy::Prompt, scripted(&["local"]));
        let out = ProgressReporter::hidden(Direction::Upload, 1);

        let resolution = resolver.resolve(&conflict(), &out).await.unwrap();
        assert_eq!(resolution, Resolution::KeepLocal);
    }

    #[tokio::test]
    async fn test_invalid_answer_skips() {
        let resolver = ConflictResolver::new(ConflictPolicy::Prompt, scripted(&["overwrite"]));
        let out = ProgressReporter::hidden(Direction::Download, 1);

        let resolution = resolver.resolve(&conflict(), &out).await.unwrap();
        assert_eq!(resolution, Resolution::Skip);
    }

    #[tokio::test]
    async fn test_fixed_policy_never_prompts() {
        let resolver = ConflictResolver::new(ConflictPolicy::Remote, scripted(&[]));
        let out = ProgressReporter::hidden(Direction::Download, 1);

        let resolution = resolver.resolve(&conflict(), &out).await.unwrap();
        assert_eq!(resolution, Resolution::KeepRemote);
    }
}
