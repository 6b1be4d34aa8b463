use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::OrchestratorError;
use crate::scheduler::WorkerPool;
use crate::task::TaskHandle;

/// Plazo para un lote completo, no por tarea.
pub const DEFAULT_BATCH_DEADLINE: Duration = Duration::from_secs(20);

/// Conteo de tareas que faltan llegar a estado terminal.
struct Tally {
    remaining: AtomicUsize,
    notify: Notify,
}

impl Tally {
    fn new(total: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(total),
            notify: Notify::new(),
        }
    }

    fn arrive(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one guarda el permiso si todavía nadie espera
            self.notify.notify_one();
        }
    }

    async fn wait(&self) {
        while self.remaining.load(Ordering::Acquire) > 0 {
            self.notify.notified().await;
        }
    }
}

/// Resultado agregado de un lote, en el orden en que se enviaron las cadenas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// `true` si la tarea terminal de la cadena quedó en Fulfilled.
    pub fulfilled: Vec<bool>,
    /// Cadenas que seguían sin estado terminal cuando volvió la barrera.
    pub pending: usize,
    pub deadline: Duration,
    pub elapsed: Duration,
}

impl Aggregate {
    pub fn len(&self) -> usize {
        self.fulfilled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fulfilled.is_empty()
    }

    pub fn fulfilled_count(&self) -> usize {
        self.fulfilled.iter().filter(|ok| **ok).count()
    }

    pub fn all_fulfilled(&self) -> bool {
        self.fulfilled.iter().all(|ok| *ok)
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    /// Un agregado incompleto (venció el plazo) es un error de lote.
    pub fn into_result(self) -> Result<Self, OrchestratorError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(OrchestratorError::DeadlineElapsed {
                deadline: self.deadline,
                pending: self.pending,
                total: self.len(),
            })
        }
    }
}

/// Punto único de espera para todas las cadenas de un lote.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    deadline: Duration,
    pool: WorkerPool,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_DEADLINE)
    }
}

impl CompletionBarrier {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            pool: WorkerPool::unbounded(),
        }
    }

    /// Pool usado para arrancar handles que nadie inició todavía.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Espera a que todos los handles sean terminales o a que venza el plazo.
    ///
    /// Al vencer devuelve igual; las tareas que siguen en vuelo no se
    /// cancelan y continúan en segundo plano.
    pub async fn await_all(&self, handles: &[TaskHandle]) -> Aggregate {
        let started = Instant::now();
        let tally = Arc::new(Tally::new(handles.len()));

        let watchers: Vec<_> = handles
            .iter()
            .map(|handle| {
                handle.ensure_started(&self.pool);
                let handle = handle.clone();
                let tally = Arc::clone(&tally);
                tokio::spawn(async move {
                    handle.terminal().await;
                    tally.arrive();
                })
            })
            .collect();

        let timed_out = tokio::time::timeout(self.deadline, tally.wait())
            .await
            .is_err();
        for watcher in watchers {
            watcher.abort();
        }

        let fulfilled: Vec<bool> = handles.iter().map(TaskHandle::is_fulfilled).collect();
        let pending = handles
            .iter()
            .filter(|h| !h.phase().is_terminal())
            .count();
        let aggregate = Aggregate {
            fulfilled,
            pending,
            deadline: self.deadline,
            elapsed: started.elapsed(),
        };

        // El vencimiento lo reporta quien llama, como error del lote
        if timed_out && pending > 0 {
            debug!(
                "barrera vencida tras {:?}: {} de {} cadenas sin terminar",
                self.deadline,
                pending,
                handles.len()
            );
        } else {
            info!(
                "barrera completa en {:?}: {}/{} cadenas cumplidas",
                aggregate.elapsed,
                aggregate.fulfilled_count(),
                aggregate.len()
            );
        }
        aggregate
    }
}
