use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::chain::Chain;
use crate::error::OrchestratorError;
use crate::task::TaskHandle;

/// Slots de ejecución para las unidades de trabajo.
///
/// Sin límite (por defecto) cada tarea corre en cuanto es elegible. Con
/// límite, cada tarea toma un permiso antes de pasar a Running y lo suelta
/// al terminar, igual que los slots de concurrencia de un worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    slots: Option<Arc<Semaphore>>,
    limit: Option<usize>,
}

impl WorkerPool {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Some(Arc::new(Semaphore::new(limit))),
            limit: Some(limit),
        }
    }

    /// `None` = sin límite.
    pub fn with_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unbounded, Self::bounded)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.slots {
            // El semáforo nunca se cierra, así que acquire no falla
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        }
    }
}

/// Arranca lotes de cadenas en paralelo.
///
/// Las raíces de cadenas distintas corren sin orden entre sí; dentro de una
/// cadena cada hijo espera a su padre. La falla de una cadena no cancela a
/// las demás. Debe usarse dentro de un runtime de tokio.
#[derive(Debug, Clone, Default)]
pub struct BatchScheduler {
    pool: WorkerPool,
}

impl BatchScheduler {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Inicia todas las tareas de cada cadena y devuelve un handle por
    /// cadena (el de su última tarea), en el mismo orden de entrada.
    ///
    /// Iniciar una tarea que ya estaba iniciada (por ejemplo, dos cadenas
    /// que comparten raíz) es un error de programación y corta el envío.
    pub fn submit_all<I>(&self, chains: I) -> Result<Vec<TaskHandle>, OrchestratorError>
    where
        I: IntoIterator<Item = Chain>,
    {
        let mut handles = Vec::new();

        for chain in chains {
            for task in &chain.tasks {
                Arc::clone(task).start(&self.pool)?;
            }
            debug!(
                chain = %chain.id(),
                tasks = chain.len(),
                "cadena enviada"
            );
            handles.push(chain.terminal);
        }

        info!(
            "lote enviado: {} cadenas (límite de workers: {})",
            handles.len(),
            self.pool
                .limit()
                .map_or_else(|| "sin límite".to_string(), |n| n.to_string())
        );
        Ok(handles)
    }
}
