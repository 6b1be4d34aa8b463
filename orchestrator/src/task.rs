use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{Failure, OrchestratorError};
use crate::scheduler::WorkerPool;

/// Unidad de trabajo ya construida (una llamada de red, típicamente).
pub type Work<T> = BoxFuture<'static, Result<T, Failure>>;

pub(crate) type Observer = Box<dyn FnOnce(&Failure) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Pending -> Running -> {Fulfilled | Rejected}.
/// Skipped es terminal para hijos cuyo padre no terminó en Fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Running,
    Fulfilled,
    Rejected,
    Skipped,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Fulfilled | TaskPhase::Rejected | TaskPhase::Skipped
        )
    }
}

/// Cómo arranca una tarea: directo (raíz) o detrás de la compuerta del padre.
pub(crate) enum Launch<T> {
    Ready(Work<T>),
    /// Resuelve a `None` si el padre no terminó en Fulfilled.
    Gated(BoxFuture<'static, Option<Work<T>>>),
}

#[derive(Default)]
pub(crate) struct Observers {
    pub(crate) pending: Vec<Observer>,
    pub(crate) closed: bool,
}

pub(crate) struct TaskCore<T> {
    pub(crate) id: TaskId,
    pub(crate) parent: Option<Arc<dyn Schedule>>,
    pub(crate) launch: Mutex<Option<Launch<T>>>,
    pub(crate) phase: watch::Sender<TaskPhase>,
    pub(crate) outcome: OnceLock<Result<T, Failure>>,
    pub(crate) observers: Mutex<Observers>,
}

pub(crate) fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + Sync + 'static> TaskCore<T> {
    pub(crate) fn new(launch: Launch<T>, parent: Option<Arc<dyn Schedule>>) -> Self {
        let (phase, _) = watch::channel(TaskPhase::Pending);
        Self {
            id: TaskId::new(),
            parent,
            launch: Mutex::new(Some(launch)),
            phase,
            outcome: OnceLock::new(),
            observers: Mutex::new(Observers::default()),
        }
    }

    async fn drive(self: Arc<Self>, launch: Launch<T>, pool: WorkerPool) {
        let work = match launch {
            Launch::Ready(work) => work,
            Launch::Gated(gate) => match gate.await {
                Some(work) => work,
                None => {
                    debug!(task = %self.id, "padre sin completar, se omite la tarea");
                    self.skip();
                    return;
                }
            },
        };

        // El slot se pide recién acá: un hijo esperando a su padre no ocupa worker
        let _permit = pool.acquire().await;
        self.phase.send_replace(TaskPhase::Running);
        debug!(task = %self.id, "tarea en ejecución");

        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Failure::new("panic", panic_message(panic.as_ref()))),
        };
        self.finish(result);
    }

    fn finish(&self, result: Result<T, Failure>) {
        let phase = if result.is_ok() {
            TaskPhase::Fulfilled
        } else {
            TaskPhase::Rejected
        };
        // Un solo driver por tarea, así que el set nunca pisa otro valor
        let _ = self.outcome.set(result);

        let observers = {
            let mut observers = lock(&self.observers);
            observers.closed = true;
            std::mem::take(&mut observers.pending)
        };
        if let Some(Err(failure)) = self.outcome.get() {
            for observer in observers {
                notify(self.id, observer, failure);
            }
        }

        // Se publica al final: los hijos arrancan con los observadores ya corridos
        self.phase.send_replace(phase);
        debug!(task = %self.id, ?phase, "tarea terminada");
    }

    fn skip(&self) {
        lock(&self.observers).closed = true;
        self.phase.send_replace(TaskPhase::Skipped);
    }

    pub(crate) fn add_observer(&self, observer: Observer) {
        {
            let mut observers = lock(&self.observers);
            if !observers.closed {
                observers.pending.push(observer);
                return;
            }
        }
        // Ya terminó: si fue rechazo, se avisa en el momento
        if let Some(Err(failure)) = self.outcome.get() {
            notify(self.id, observer, failure);
        }
    }
}

/// Los observadores son consultivos: un panic adentro se registra y se descarta.
fn notify(task: TaskId, observer: Observer, failure: &Failure) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(failure))) {
        error!(
            task = %task,
            "observador de fallo abortó: {}",
            panic_message(panic.as_ref())
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic sin mensaje".to_string()
    }
}

/// Vista sin tipo de una tarea, para que scheduler y barrera manejen
/// cadenas con valores distintos.
pub(crate) trait Schedule: Send + Sync {
    fn id(&self) -> TaskId;

    fn phase(&self) -> watch::Receiver<TaskPhase>;

    /// Arranca la tarea. Falla si ya fue iniciada.
    fn start(self: Arc<Self>, pool: &WorkerPool) -> Result<(), OrchestratorError>;

    /// Arranca la tarea (y sus ancestros) si nadie lo hizo todavía.
    fn ensure_started(self: Arc<Self>, pool: &WorkerPool);
}

impl<T: Send + Sync + 'static> Schedule for TaskCore<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn phase(&self) -> watch::Receiver<TaskPhase> {
        self.phase.subscribe()
    }

    fn start(self: Arc<Self>, pool: &WorkerPool) -> Result<(), OrchestratorError> {
        let launch = lock(&self.launch)
            .take()
            .ok_or(OrchestratorError::AlreadyStarted(self.id))?;
        tokio::spawn(self.drive(launch, pool.clone()));
        Ok(())
    }

    fn ensure_started(self: Arc<Self>, pool: &WorkerPool) {
        if let Some(parent) = &self.parent {
            Arc::clone(parent).ensure_started(pool);
        }
        // AlreadyStarted acá significa que no hay nada que hacer
        let _ = self.start(pool);
    }
}

/// Tarea diferida: la unidad de trabajo no corre hasta que el scheduler
/// la inicia.
pub struct Task<T> {
    pub(crate) core: Arc<TaskCore<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + Sync + 'static> Task<T> {
    /// Tarea raíz. El closure se invoca recién cuando la tarea arranca.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let work = async move { work().await }.boxed();
        Self {
            core: Arc::new(TaskCore::new(Launch::Ready(work), None)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.core.id
    }

    pub fn phase(&self) -> TaskPhase {
        *self.core.phase.borrow()
    }

    /// Valor de la tarea si terminó en Fulfilled.
    pub fn value(&self) -> Option<&T> {
        self.core.outcome.get().and_then(|r| r.as_ref().ok())
    }

    /// Fallo de la tarea si terminó en Rejected.
    pub fn failure(&self) -> Option<&Failure> {
        self.core.outcome.get().and_then(|r| r.as_ref().err())
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.schedule())
    }

    pub(crate) fn schedule(&self) -> Arc<dyn Schedule> {
        Arc::clone(&self.core) as Arc<dyn Schedule>
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("phase", &*self.core.phase.borrow())
            .finish()
    }
}

/// Handle de sólo lectura sobre una tarea: permite esperar su estado
/// terminal pero no arrancarla.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    phase: watch::Receiver<TaskPhase>,
    task: Arc<dyn Schedule>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<dyn Schedule>) -> Self {
        Self {
            id: task.id(),
            phase: task.phase(),
            task,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn phase(&self) -> TaskPhase {
        *self.phase.borrow()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.phase() == TaskPhase::Fulfilled
    }

    /// Bloquea hasta que la tarea sea terminal o pase `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<TaskPhase, OrchestratorError> {
        tokio::time::timeout(timeout, self.terminal())
            .await
            .map_err(|_| OrchestratorError::WaitTimedOut {
                task: self.id,
                timeout,
            })
    }

    pub(crate) async fn terminal(&self) -> TaskPhase {
        let mut phase = self.phase.clone();
        let terminal = match phase.wait_for(|p| p.is_terminal()).await {
            Ok(p) => *p,
            // El sender vive dentro de la tarea, que este handle mantiene viva
            Err(_) => self.phase(),
        };
        terminal
    }

    pub(crate) fn ensure_started(&self, pool: &WorkerPool) {
        Arc::clone(&self.task).ensure_started(pool);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}
