//! In-memory container runtime for tests
//!
//! Keeps an image store, a container table and a pull counter so sandbox and
//! image-policy behaviour can be checked by introspection without a daemon.

use super::runtime::{ContainerLogs, ContainerRequest, ContainerRuntime, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted behaviour of the next container run
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    /// Exits immediately with the given code and output
    Exit {
        code: i64,
        stdout: String,
        stderr: String,
    },
    /// Runs for `duration`, then exits
    Sleep {
        duration: Duration,
        code: i64,
        stdout: String,
    },
    /// Never exits on its own; output flushed so far is `stdout`
    Hang { stdout: String },
    /// Never exits and its log endpoint never answers either
    Unresponsive,
}

impl ScriptedRun {
    pub fn success(stdout: impl Into<String>) -> Self {
        ScriptedRun::Exit {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i64, stderr: impl Into<String>) -> Self {
        ScriptedRun::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Default)]
struct State {
    images: HashSet<String>,
    pull_failure: Option<String>,
    live: HashMap<String, ScriptedRun>,
    created: Vec<ContainerRequest>,
    script: VecDeque<ScriptedRun>,
    default_run: Option<ScriptedRun>,
    next_id: usize,
}

pub struct InMemoryRuntime {
    state: Mutex<State>,
    reachable: AtomicBool,
    fail_removal: AtomicBool,
    pull_count: AtomicUsize,
    removed_count: AtomicUsize,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reachable: AtomicBool::new(true),
            fail_removal: AtomicBool::new(false),
            pull_count: AtomicUsize::new(0),
            removed_count: AtomicUsize::new(0),
        }
    }

    /// Marks `image` as present locally
    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.lock().images.insert(image.into());
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes every subsequent pull fail with `reason`
    pub fn set_pull_failure(&self, reason: Option<String>) {
        self.lock().pull_failure = reason;
    }

    /// Makes force-removal fail, leaving the container behind
    pub fn set_fail_removal(&self, fail: bool) {
        self.fail_removal.store(fail, Ordering::SeqCst);
    }

    /// Queues the behaviour of the next created container
    pub fn push_run(&self, run: ScriptedRun) {
        self.lock().script.push_back(run);
    }

    /// Behaviour used once the queue is empty
    pub fn set_default_run(&self, run: ScriptedRun) {
        self.lock().default_run = Some(run);
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    /// Number of network pulls attempted
    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> usize {
        self.lock().live.len()
    }

    pub fn removed_containers(&self) -> usize {
        self.removed_count.load(Ordering::SeqCst)
    }

    /// Every create request seen so far, in order
    pub fn created_requests(&self) -> Vec<ContainerRequest> {
        self.lock().created.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Poisoning only happens if a test panicked while holding the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_reachable(&self) -> Result<(), RuntimeError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unreachable(
                "in-memory runtime is offline".to_string(),
            ))
        }
    }

    fn run_of(&self, id: &str) -> Result<ScriptedRun, RuntimeError> {
        self.lock()
            .live
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::Api(format!("No such container: {}", id)))
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRuntime")
            .field("pull_count", &self.pull_count())
            .field("live_containers", &self.live_containers())
            .finish()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.ensure_reachable()
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.ensure_reachable()?;
        Ok(self.lock().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.ensure_reachable()?;
        self.pull_count.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        if let Some(reason) = state.pull_failure.clone() {
            return Err(RuntimeError::Api(reason));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        self.ensure_reachable()?;
        let mut state = self.lock();
        if !state.images.contains(&request.image) {
            return Err(RuntimeError::ImageNotFound(request.image.clone()));
        }

        let run = state
            .script
            .pop_front()
            .or_else(|| state.default_run.clone())
            .unwrap_or_else(|| ScriptedRun::success(""));

        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.live.insert(id.clone(), run);
        state.created.push(request.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_of(id).map(|_| ())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        match self.run_of(id)? {
            ScriptedRun::Exit { code, .. } => Ok(code),
            ScriptedRun::Sleep { duration, code, .. } => {
                tokio::time::sleep(duration).await;
                Ok(code)
            }
            ScriptedRun::Hang { .. } | ScriptedRun::Unresponsive => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn container_logs(&self, id: &str) -> Result<ContainerLogs, RuntimeError> {
        match self.run_of(id)? {
            ScriptedRun::Exit { stdout, stderr, .. } => Ok(ContainerLogs { stdout, stderr }),
            ScriptedRun::Sleep { stdout, .. } | ScriptedRun::Hang { stdout } => Ok(ContainerLogs {
                stdout,
                stderr: String::new(),
            }),
            ScriptedRun::Unresponsive => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api(format!(
                "removal of {} refused by test runtime",
                id
            )));
        }
        let removed = self.lock().live.remove(id);
        match removed {
            Some(_) => {
                self.removed_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RuntimeError::Api(format!("No such container: {}", id))),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
