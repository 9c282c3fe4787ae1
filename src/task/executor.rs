//! Background task executor.
//!
//! One worker task drains a FIFO queue of script references and runs each
//! script against a [`DeviceControl`]. Scripts can loop, retry vision checks
//! and branch to other scripts on success or failure. Cancellation is
//! cooperative: it is observed between steps and at iteration boundaries,
//! never in the middle of a step.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::script::{
    AutomationScript, AutomationStep, BasicAction, ScriptError, SystemAction, VisionAction,
    VisionStep,
};
use crate::device::DeviceControl;
use crate::settings::{Settings, DEFAULT_MAX_BRANCH_DEPTH, DEFAULT_TEMPLATE_THRESHOLD};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory searched for `<name>.json` branch targets.
    pub script_dir: PathBuf,
    /// Score a template match must exceed.
    pub template_threshold: f32,
    /// Maximum nesting of on_success/on_failure scripts.
    pub max_branch_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("scripts"),
            template_threshold: DEFAULT_TEMPLATE_THRESHOLD,
            max_branch_depth: DEFAULT_MAX_BRANCH_DEPTH,
        }
    }
}

impl From<&Settings> for ExecutorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            script_dir: settings.script_dir.clone(),
            template_threshold: settings.template_threshold,
            max_branch_depth: settings.max_branch_depth,
        }
    }
}

/// How a script run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    Succeeded,
    /// A step failed; `step` is 1-based.
    Failed { step: usize, description: String },
    /// The executor was stopped mid-run.
    Cancelled,
    /// The reference could not be resolved to a valid script.
    LoadFailed(String),
}

/// Result of one top-level script run.
#[derive(Debug, Clone)]
pub struct ScriptReport {
    /// Script name, or the raw reference when loading failed.
    pub name: String,
    pub outcome: ScriptOutcome,
    /// Iterations whose steps all succeeded.
    pub iterations_completed: u32,
    pub elapsed: Duration,
}

impl ScriptReport {
    pub fn is_success(&self) -> bool {
        self.outcome == ScriptOutcome::Succeeded
    }

    fn load_failed(reference: &str, error: &ScriptError) -> Self {
        Self {
            name: reference.to_string(),
            outcome: ScriptOutcome::LoadFailed(error.to_string()),
            iterations_completed: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Callback invoked with every finished queued script.
pub type ReportCallback = Box<dyn Fn(&ScriptReport) + Send + Sync>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

enum StepsResult {
    Completed,
    Failed(usize),
    Cancelled,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Inner {
    device: Arc<dyn DeviceControl>,
    config: ExecutorConfig,
    scripts: RwLock<HashMap<String, Arc<AutomationScript>>>,
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
    running: AtomicBool,
    report_callback: RwLock<Option<ReportCallback>>,
}

/// Runs automation scripts one at a time on a background worker.
pub struct TaskExecutor {
    inner: Arc<Inner>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl TaskExecutor {
    /// Create a stopped executor.
    pub fn new(device: Arc<dyn DeviceControl>, config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                config,
                scripts: RwLock::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                report_callback: RwLock::new(None),
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Set a callback for reports of queued scripts.
    pub fn with_report_callback<F>(self, callback: F) -> Self
    where
        F: Fn(&ScriptReport) + Send + Sync + 'static,
    {
        *self.inner.report_callback.write() = Some(Box::new(callback));
        self
    }

    /// Add a script to the table, replacing any script with the same name.
    pub fn register(&self, script: AutomationScript) {
        self.inner.register(script);
    }

    /// Load a script file into the table and return its name.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<String, ScriptError> {
        let script = AutomationScript::from_file(path)?;
        Ok(self.inner.register(script).name.clone())
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.inner.scripts.read().contains_key(name)
    }

    /// Spawn the worker. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        self.inner.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(worker_loop(self.inner.clone(), cancel.clone()));
        *worker = Some(Worker { handle, cancel });
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A step already in flight runs to completion first. Entries still
    /// queued stay queued for the next `start`.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            tracing::error!("Task executor worker panicked: {}", e);
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Queue a script by name or file path.
    pub fn submit(&self, reference: impl Into<String>) {
        let reference = reference.into();
        let len = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(reference.clone());
            queue.len()
        };
        tracing::info!("Submitted script {} (queue length {})", reference, len);
        self.inner.notify.notify_one();
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run a script immediately on the caller's task.
    ///
    /// Does not go through the queue and is not cancelled by `stop`.
    pub async fn run(&self, reference: &str) -> ScriptReport {
        let cancel = CancellationToken::new();
        self.inner.run_reference(reference, &cancel).await
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    tracing::info!("Task executor started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut queue = inner.queue.lock();
            queue.pop_front().map(|reference| (reference, queue.len()))
        };
        let (reference, remaining) = match next {
            Some(entry) => entry,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.notify.notified() => continue,
                }
            }
        };

        tracing::info!("Dequeued script {} ({} remaining)", reference, remaining);
        let report = inner.run_reference(&reference, &cancel).await;
        inner.publish(&report);
    }

    tracing::info!("Task executor stopped");
}

/// Shell command that launches an app.
///
/// `package/activity` starts that activity; a bare package goes through its
/// launcher intent.
pub fn start_app_command(package: &str) -> String {
    if package.contains('/') {
        format!("am start -n {}", package)
    } else {
        format!(
            "monkey -p {} -c android.intent.category.LAUNCHER 1",
            package
        )
    }
}

impl Inner {
    fn register(&self, script: AutomationScript) -> Arc<AutomationScript> {
        let script = Arc::new(script);
        self.scripts
            .write()
            .insert(script.name.clone(), script.clone());
        script
    }

    fn lookup(&self, name: &str) -> Option<Arc<AutomationScript>> {
        self.scripts.read().get(name).cloned()
    }

    fn resolve_reference(&self, reference: &str) -> Result<Arc<AutomationScript>, ScriptError> {
        if let Some(script) = self.lookup(reference) {
            return Ok(script);
        }
        let script = AutomationScript::from_file(reference)?;
        Ok(self.register(script))
    }

    fn resolve_branch(&self, name: &str) -> Result<Arc<AutomationScript>, ScriptError> {
        if let Some(script) = self.lookup(name) {
            return Ok(script);
        }
        let path = self.config.script_dir.join(format!("{}.json", name));
        let script = AutomationScript::from_file(path)?;
        Ok(self.register(script))
    }

    fn publish(&self, report: &ScriptReport) {
        if let Some(callback) = self.report_callback.read().as_ref() {
            callback(report);
        }
    }

    async fn run_reference(&self, reference: &str, cancel: &CancellationToken) -> ScriptReport {
        match self.resolve_reference(reference) {
            Ok(script) => self.run_script(script, cancel, 0).await,
            Err(e) => {
                tracing::error!("Discarding script {}: {}", reference, e);
                ScriptReport::load_failed(reference, &e)
            }
        }
    }

    fn run_script<'a>(
        &'a self,
        script: Arc<AutomationScript>,
        cancel: &'a CancellationToken,
        depth: usize,
    ) -> BoxFuture<'a, ScriptReport> {
        Box::pin(async move {
            let started = Instant::now();
            let iterations = script.iterations();
            let mut completed = 0;

            tracing::info!(
                script = %script.name,
                depth,
                "Running script ({} steps, {} iterations)",
                script.steps.len(),
                iterations
            );

            let outcome = 'run: {
                for iteration in 1..=iterations {
                    if cancel.is_cancelled() {
                        break 'run ScriptOutcome::Cancelled;
                    }
                    if iterations > 1 {
                        tracing::info!(script = %script.name, "Iteration {}/{}", iteration, iterations);
                    }

                    match self.run_steps(&script, cancel).await {
                        StepsResult::Completed => {
                            completed += 1;
                            if let Some(next) = &script.on_success {
                                self.run_branch(&script.name, next, cancel, depth).await;
                                // a stop that landed inside the branch ends the parent too
                                if cancel.is_cancelled() {
                                    break 'run ScriptOutcome::Cancelled;
                                }
                            }
                        }
                        StepsResult::Failed(index) => {
                            if let Some(next) = &script.on_failure {
                                self.run_branch(&script.name, next, cancel, depth).await;
                            }
                            break 'run ScriptOutcome::Failed {
                                step: index + 1,
                                description: script.steps[index].to_string(),
                            };
                        }
                        StepsResult::Cancelled => break 'run ScriptOutcome::Cancelled,
                    }
                }
                ScriptOutcome::Succeeded
            };

            let report = ScriptReport {
                name: script.name.clone(),
                outcome,
                iterations_completed: completed,
                elapsed: started.elapsed(),
            };
            match &report.outcome {
                ScriptOutcome::Succeeded => {
                    tracing::info!(script = %report.name, "Script succeeded in {:?}", report.elapsed)
                }
                ScriptOutcome::Failed { step, description } => tracing::warn!(
                    script = %report.name,
                    "Script failed at step {} ({})",
                    step,
                    description
                ),
                ScriptOutcome::Cancelled => tracing::info!(script = %report.name, "Script cancelled"),
                ScriptOutcome::LoadFailed(_) => {}
            }
            report
        })
    }

    async fn run_branch(&self, from: &str, name: &str, cancel: &CancellationToken, depth: usize) {
        if depth >= self.config.max_branch_depth {
            tracing::error!(
                script = %from,
                "Not running {}: branch depth limit {} reached",
                name,
                self.config.max_branch_depth
            );
            return;
        }

        let script = match self.resolve_branch(name) {
            Ok(script) => script,
            Err(e) => {
                tracing::error!(script = %from, "Cannot load branch script {}: {}", name, e);
                return;
            }
        };

        tracing::info!(script = %from, "Branching to {}", name);
        self.run_script(script, cancel, depth + 1).await;
    }

    async fn run_steps(&self, script: &AutomationScript, cancel: &CancellationToken) -> StepsResult {
        for (index, step) in script.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return StepsResult::Cancelled;
            }

            let started = Instant::now();
            let ok = self.execute_step(step).await;
            let elapsed_ms = started.elapsed().as_millis();

            if ok {
                tracing::info!(script = %script.name, step = index + 1, "{} ok ({} ms)", step, elapsed_ms);
            } else {
                tracing::warn!(script = %script.name, step = index + 1, "{} failed ({} ms)", step, elapsed_ms);
                return StepsResult::Failed(index);
            }
        }
        StepsResult::Completed
    }

    async fn execute_step(&self, step: &AutomationStep) -> bool {
        let device = &self.device;
        match step {
            AutomationStep::Basic(s) => match s.action {
                BasicAction::Click => device.click(s.x, s.y).await,
                BasicAction::Swipe => device.swipe(s.x, s.y, s.x2, s.y2, s.duration).await,
                BasicAction::Wait => {
                    device.wait(s.duration).await;
                    true
                }
            },
            AutomationStep::Vision(s) => self.execute_vision(s).await,
            AutomationStep::System(s) => {
                let command = match s.action {
                    SystemAction::Shell => s.shell_cmd.clone(),
                    SystemAction::StartApp => start_app_command(&s.package_name),
                };
                let output = device.shell(&command).await;
                if !output.is_empty() {
                    tracing::debug!("{}: {}", command, output.trim_end());
                }
                true
            }
        }
    }

    async fn execute_vision(&self, step: &VisionStep) -> bool {
        let device = &self.device;
        match step.action {
            VisionAction::Screenshot => device.capture_screenshot(&step.image_name).await.is_some(),
            VisionAction::Ocr => {
                self.with_retries(step, move || async move {
                    match device.recognize_text(&step.image_name).await {
                        Ok(regions) => regions.iter().any(|r| r.text.contains(&step.target_text)),
                        Err(e) => {
                            tracing::warn!("OCR failed: {}", e);
                            false
                        }
                    }
                })
                .await
            }
            VisionAction::OcrClick => {
                self.with_retries(step, move || async move {
                    let regions = match device.recognize_text(&step.image_name).await {
                        Ok(regions) => regions,
                        Err(e) => {
                            tracing::warn!("OCR failed: {}", e);
                            return false;
                        }
                    };
                    match regions.iter().find(|r| r.text.contains(&step.target_text)) {
                        Some(region) => {
                            let (x, y) = region.center();
                            tracing::debug!("Found {:?} at ({}, {})", step.target_text, x, y);
                            device.click(x, y).await
                        }
                        None => false,
                    }
                })
                .await
            }
            VisionAction::OcrRegion => {
                let Some(roi) = &step.roi else {
                    return false;
                };
                self.with_retries(step, move || async move {
                    match device.recognize_region(&step.image_name, roi).await {
                        Ok(text) if step.target_text.is_empty() => !text.is_empty(),
                        Ok(text) => text.contains(&step.target_text),
                        Err(e) => {
                            tracing::warn!("Region OCR failed: {}", e);
                            false
                        }
                    }
                })
                .await
            }
            VisionAction::Template => {
                let threshold = self.config.template_threshold;
                self.with_retries(step, move || async move {
                    match device
                        .find_template(&step.image_name, &step.template_path)
                        .await
                    {
                        Ok(Some(found)) if found.score > threshold => {
                            let (x, y) = found.center();
                            tracing::debug!("Template {} score {:.3}", step.template_path, found.score);
                            device.click(x, y).await
                        }
                        Ok(Some(found)) => {
                            tracing::debug!(
                                "Template {} below threshold: {:.3}",
                                step.template_path,
                                found.score
                            );
                            false
                        }
                        Ok(None) => false,
                        Err(e) => {
                            tracing::warn!("Template match failed: {}", e);
                            false
                        }
                    }
                })
                .await
            }
        }
    }

    /// Run `attempt` up to `retry_count` times, waiting between attempts.
    async fn with_retries<F, Fut>(&self, step: &VisionStep, mut attempt: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let attempts = step.retry_count.max(1);
        for n in 1..=attempts {
            if attempt().await {
                return true;
            }
            if n < attempts {
                tracing::debug!("Attempt {}/{} for {} missed", n, attempts, step.action);
                self.device.wait(step.retry_delay_ms()).await;
            }
        }
        false
    }
}
