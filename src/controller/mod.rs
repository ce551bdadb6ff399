pub mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;

use crate::{
    client::ImageGenerator,
    config::KioskConfig,
    error::{KioskError, Result},
    logger::Timer,
    models::{DisplayState, FormSelection, GenerationRequest, GenerationResult},
    prompt::PromptBuilder,
};

pub use state::{ControllerCore, Effect};

#[derive(Debug)]
enum Command {
    FormChanged(FormSelection),
    Regenerate,
    ClearFault,
    Shutdown,
}

#[derive(Debug)]
struct WorkerReport {
    id: u64,
    attempt: u32,
    result: GenerationResult,
}

/// Cheap, cloneable front end to a running [`RequestController`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    display: watch::Receiver<DisplayState>,
}

impl ControllerHandle {
    /// Pushes a full form snapshot. Never blocks.
    pub fn submit(&self, selection: FormSelection) -> Result<()> {
        self.send(Command::FormChanged(selection))
    }

    pub fn regenerate(&self) -> Result<()> {
        self.send(Command::Regenerate)
    }

    pub fn clear_fault(&self) -> Result<()> {
        self.send(Command::ClearFault)
    }

    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    /// Stream of display states, starting with the current one.
    pub fn changes(&self) -> WatchStream<DisplayState> {
        WatchStream::new(self.display.clone())
    }

    /// Stops the controller and waits until it has let go of its workers.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_ok() {
            self.commands.closed().await;
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| KioskError::ControllerStopped)
    }
}

/// Owns the generation state machine and runs it on a single task.
///
/// Form changes and worker reports are handled one at a time, so the display
/// and the sequence counter never need a lock. Generation calls run on their
/// own tasks and report back over a channel.
pub struct RequestController<G: ImageGenerator + ?Sized> {
    core: ControllerCore,
    generator: Arc<G>,
    timeout: Duration,
    cancel_superseded: bool,
    /// Id a worker must match before it is allowed to call the generator.
    active: Arc<AtomicU64>,
    workers: HashMap<u64, JoinHandle<()>>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports_tx: mpsc::UnboundedSender<WorkerReport>,
    reports_rx: mpsc::UnboundedReceiver<WorkerReport>,
    display_tx: watch::Sender<DisplayState>,
    published: u64,
}

impl<G: ImageGenerator + ?Sized + 'static> RequestController<G> {
    /// Validates `config` and starts the controller task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(generator: Arc<G>, config: &KioskConfig) -> Result<ControllerHandle> {
        config.validate()?;

        let core = ControllerCore::new(
            PromptBuilder::new(config.prompt.clone()),
            config.retry.clone(),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(core.display().clone());

        let controller = RequestController {
            published: core.display().revision,
            core,
            generator,
            timeout: config.request_timeout,
            cancel_superseded: config.cancel_superseded,
            active: Arc::new(AtomicU64::new(0)),
            workers: HashMap::new(),
            commands: commands_rx,
            reports_tx,
            reports_rx,
            display_tx,
        };
        tokio::spawn(controller.run());
        log::info!("Request controller started");

        Ok(ControllerHandle {
            commands: commands_tx,
            display: display_rx,
        })
    }

    async fn run(mut self) {
        loop {
            let effects = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::FormChanged(selection)) => self.core.on_form_changed(selection),
                    Some(Command::Regenerate) => self.core.regenerate(),
                    Some(Command::ClearFault) => self.core.clear_fault(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(report) = self.reports_rx.recv() => {
                    self.workers.remove(&report.id);
                    self.core.on_result(report.id, report.attempt, report.result)
                }
            };

            self.active
                .store(self.core.pending_id().unwrap_or(0), Ordering::Release);
            for effect in effects {
                self.apply(effect);
            }
            self.publish();
        }

        for (id, worker) in self.workers.drain() {
            log::debug!("Aborting worker for request #{}", id);
            worker.abort();
        }
        log::info!("Request controller stopped");
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Dispatch {
                request,
                attempt,
                delay,
            } => {
                let id = request.id;
                let worker = tokio::spawn(run_attempt(
                    Arc::clone(&self.generator),
                    request,
                    attempt,
                    delay,
                    self.timeout,
                    Arc::clone(&self.active),
                    self.reports_tx.clone(),
                ));
                if let Some(previous) = self.workers.insert(id, worker) {
                    previous.abort();
                }
            }
            Effect::Abandon { id } => {
                // Dropping the handle detaches the worker; its report will be stale.
                if let Some(worker) = self.workers.remove(&id) {
                    if self.cancel_superseded {
                        log::debug!("Cancelling in-flight request #{}", id);
                        worker.abort();
                    }
                }
            }
        }
    }

    fn publish(&mut self) {
        let display = self.core.display();
        if display.revision != self.published {
            self.published = display.revision;
            self.display_tx.send_replace(display.clone());
        }
    }
}

async fn run_attempt<G: ImageGenerator + ?Sized>(
    generator: Arc<G>,
    request: GenerationRequest,
    attempt: u32,
    delay: Duration,
    timeout: Duration,
    active: Arc<AtomicU64>,
    reports: mpsc::UnboundedSender<WorkerReport>,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if active.load(Ordering::Acquire) != request.id {
        log::debug!("Request #{} abandoned before dispatch", request.id);
        return;
    }

    let timer = Timer::new(&format!("request #{} attempt {}", request.id, attempt + 1));
    let deadline = Instant::now() + timeout;
    let outcome =
        match tokio::time::timeout_at(deadline, generator.generate(&request.spec, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(KioskError::Timeout(timeout)),
        };

    let result = match outcome {
        Ok(image) => {
            timer.finish("succeeded");
            GenerationResult::Success {
                image,
                spec: request.spec,
            }
        }
        Err(err) => {
            timer.finish("failed");
            GenerationResult::Failure {
                kind: err.failure_kind(),
                detail: err.to_string(),
            }
        }
    };

    let _ = reports.send(WorkerReport {
        id: request.id,
        attempt,
        result,
    });
}
