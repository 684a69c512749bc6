//! Image pull policy engine

use super::runtime::{ContainerRuntime, RuntimeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// When to contact the registry for a sandbox image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Pull unconditionally, refreshing the local copy
    Always,
    /// Pull only when the runtime reports the image absent
    #[default]
    IfNotPresent,
    /// Never touch the network; fail if the image is absent
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "if-not-present",
            PullPolicy::Never => "never",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(PullPolicy::Always),
            "if-not-present" | "if_not_present" | "ifnotpresent" => Ok(PullPolicy::IfNotPresent),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!(
                "Invalid pull policy: {}. Valid options: always, if-not-present, never",
                other
            )),
        }
    }
}

/// An image could not be made available
#[derive(Debug, Clone, Error)]
#[error("Failed to ensure image '{image}': {reason}")]
pub struct ImagePullError {
    pub image: String,
    pub reason: String,
    /// Registry or network trouble that may clear up on a later attempt
    pub transient: bool,
}

impl ImagePullError {
    fn new(image: &str, reason: impl Into<String>, transient: bool) -> Self {
        Self {
            image: image.to_string(),
            reason: reason.into(),
            transient,
        }
    }
}

/// Makes sure images are present locally before a sandbox run
///
/// Presence is always asked of the runtime; nothing is cached here.
pub struct ImagePullManager {
    runtime: Arc<dyn ContainerRuntime>,
    pull_timeout: Duration,
    /// Serializes check-then-pull so concurrent callers share one pull
    pull_lock: Mutex<()>,
}

impl ImagePullManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, pull_timeout: Duration) -> Self {
        Self {
            runtime,
            pull_timeout,
            pull_lock: Mutex::new(()),
        }
    }

    /// Ensures `image` is available according to `policy`
    ///
    /// Failures are returned as values; a pull is bounded by the configured
    /// pull timeout on top of whatever the runtime enforces.
    pub async fn ensure(&self, image: &str, policy: PullPolicy) -> Result<(), ImagePullError> {
        match policy {
            PullPolicy::Never => match self.runtime.image_exists(image).await {
                Ok(true) => {
                    debug!(image, "Image found locally");
                    Ok(())
                }
                Ok(false) => {
                    let reason = format!(
                        "Image '{}' not found locally and pull policy is 'never'",
                        image
                    );
                    error!(image, "{}", reason);
                    Err(ImagePullError::new(image, reason, false))
                }
                Err(e) => Err(Self::runtime_failure(image, e)),
            },
            PullPolicy::IfNotPresent => {
                let _guard = self.pull_lock.lock().await;
                match self.runtime.image_exists(image).await {
                    Ok(true) => {
                        debug!(image, "Image already present locally");
                        Ok(())
                    }
                    Ok(false) => self.pull(image).await,
                    Err(e) => Err(Self::runtime_failure(image, e)),
                }
            }
            PullPolicy::Always => {
                let _guard = self.pull_lock.lock().await;
                self.pull(image).await
            }
        }
    }

    async fn pull(&self, image: &str) -> Result<(), ImagePullError> {
        info!(image, "Pulling image");
        match tokio::time::timeout(self.pull_timeout, self.runtime.pull_image(image)).await {
            Ok(Ok(())) => {
                info!(image, "Image pulled successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(image, error = %e, "Image pull failed");
                Err(Self::runtime_failure(image, e))
            }
            Err(_) => {
                error!(
                    image,
                    timeout_secs = self.pull_timeout.as_secs(),
                    "Image pull timed out"
                );
                Err(ImagePullError::new(
                    image,
                    format!("pull did not finish within {}s", self.pull_timeout.as_secs()),
                    true,
                ))
            }
        }
    }

    fn runtime_failure(image: &str, e: RuntimeError) -> ImagePullError {
        let transient = !matches!(e, RuntimeError::ImageNotFound(_));
        ImagePullError::new(image, e.to_string(), transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::InMemoryRuntime;
    use yare::parameterized;

    fn manager(runtime: Arc<InMemoryRuntime>) -> ImagePullManager {
        ImagePullManager::new(runtime, Duration::from_secs(5))
    }

    #[parameterized(
        always = { "always", PullPolicy::Always },
        if_not_present = { "if-not-present", PullPolicy::IfNotPresent },
        never = { "never", PullPolicy::Never },
        upper = { "NEVER", PullPolicy::Never },
    )]
    fn test_parse_policy(input: &str, expected: PullPolicy) {
        assert_eq!(input.parse::<PullPolicy>().unwrap(), expected);
    }

    #[test]
    fn test_parse_invalid_policy() {
        assert!("sometimes".parse::<PullPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_never_with_absent_image_does_not_pull() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let err = manager(runtime.clone())
            .ensure("tool:latest", PullPolicy::Never)
            .await
            .unwrap_err();

        assert!(err.reason.contains("never"));
        assert!(!err.transient);
        assert_eq!(runtime.pull_count(), 0);
    }

    #[tokio::test]
    async fn test_never_with_present_image() {
        let runtime = Arc::new(InMemoryRuntime::new().with_image("tool:latest"));
        manager(runtime.clone())
            .ensure("tool:latest", PullPolicy::Never)
            .await
            .unwrap();
        assert_eq!(runtime.pull_count(), 0);
    }

    #[tokio::test]
    async fn test_if_not_present_pulls_at_most_once() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let manager = manager(runtime.clone());

        manager.ensure("tool:latest", PullPolicy::IfNotPresent).await.unwrap();
        manager.ensure("tool:latest", PullPolicy::IfNotPresent).await.unwrap();

        assert_eq!(runtime.pull_count(), 1);
    }

    #[tokio::test]
    async fn test_always_pulls_every_time() {
        let runtime = Arc::new(InMemoryRuntime::new().with_image("tool:latest"));
        let manager = manager(runtime.clone());

        manager.ensure("tool:latest", PullPolicy::Always).await.unwrap();
        manager.ensure("tool:latest", PullPolicy::Always).await.unwrap();

        assert_eq!(runtime.pull_count(), 2);
    }

    #[tokio::test]
    async fn test_registry_failure_is_a_value() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.set_pull_failure(Some("registry unreachable".to_string()));

        let err = manager(runtime)
            .ensure("tool:latest", PullPolicy::IfNotPresent)
            .await
            .unwrap_err();
        assert!(err.reason.contains("registry unreachable"));
        assert!(err.transient);
    }

    #[tokio::test]
    async fn test_policy_serde_kebab_case() {
        let json = serde_json::to_string(&PullPolicy::IfNotPresent).unwrap();
        assert_eq!(json, "\"if-not-present\"");
    }
}
