use std::time::Duration;

use thiserror::Error;

use crate::task::TaskId;

/// Fallo de una unidad de trabajo.
///
/// `code` es el código de razón legible por máquina (ej. el status HTTP "409")
/// y es lo que el clasificador busca en su tabla; `message` lleva el detalle
/// completo (cuerpo de la respuesta, error de transporte, etc.).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct Failure {
    pub code: String,
    pub message: String,
}

impl Failure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Errores del orquestador en sí: de programación o de lote completo.
/// Nunca pasan por el clasificador.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("la tarea {0} ya fue iniciada")]
    AlreadyStarted(TaskId),

    #[error("la tarea {task} no terminó en {timeout:?}")]
    WaitTimedOut { task: TaskId, timeout: Duration },

    #[error("se agotó el plazo del lote ({deadline:?}): {pending} de {total} cadenas siguen pendientes")]
    DeadlineElapsed {
        deadline: Duration,
        pending: usize,
        total: usize,
    },
}
