use std::collections::HashMap;

use tracing::{error, warn, Level};

use crate::error::Failure;

/// Tabla código de razón -> mensaje para los fallos esperados
/// (ej. "409" -> "el usuario ya existe").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasonTable {
    reasons: HashMap<String, String>,
}

impl ReasonTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.reasons.insert(code.into(), message.into());
        self
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.reasons.get(code).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReasonTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            reasons: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Qué hacer con un fallo: sólo severidad y texto del diagnóstico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Warn(String),
    Error(String),
}

impl Action {
    pub fn severity(&self) -> Level {
        match self {
            Action::Warn(_) => Level::WARN,
            Action::Error(_) => Level::ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Action::Warn(msg) | Action::Error(msg) => msg,
        }
    }

    /// Emite exactamente una línea de log con la severidad elegida.
    pub fn emit(&self) {
        match self {
            Action::Warn(msg) => warn!("{}", msg),
            Action::Error(msg) => error!("{}", msg),
        }
    }
}

/// Función pura: código presente en la tabla -> warning con el mensaje
/// mapeado; si no, error con el fallo crudo.
pub fn classify(failure: &Failure, reasons: &ReasonTable) -> Action {
    match reasons.get(failure.code()) {
        Some(msg) => Action::Warn(msg.to_string()),
        None => Action::Error(failure.to_string()),
    }
}

/// Observador listo para `on_failure`: clasifica y loguea.
pub fn log_failure(reasons: ReasonTable) -> impl FnOnce(&Failure) + Send + 'static {
    move |failure: &Failure| classify(failure, &reasons).emit()
}
