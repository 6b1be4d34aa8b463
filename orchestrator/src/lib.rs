//! Ejecutor de lotes concurrentes con orden padre -> hijo.
//!
//! Cada registro a importar es una [`Chain`]: una tarea raíz más sus
//! continuaciones. El [`BatchScheduler`] arranca todas las cadenas en
//! paralelo y la [`CompletionBarrier`] espera a que terminen o a que venza
//! el plazo del lote. Los fallos de cada tarea se clasifican con
//! [`classify`] contra una [`ReasonTable`].

pub mod barrier;
pub mod chain;
pub mod classifier;
pub mod error;
pub mod scheduler;
pub mod task;

pub use barrier::{Aggregate, CompletionBarrier, DEFAULT_BATCH_DEADLINE};
pub use chain::{Chain, ChainBuilder};
pub use classifier::{classify, log_failure, Action, ReasonTable};
pub use error::{Failure, OrchestratorError};
pub use scheduler::{BatchScheduler, WorkerPool};
pub use task::{Task, TaskHandle, TaskId, TaskPhase, Work};
