use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/* --------- Archivo de datos de prueba --------- */

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportData {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub owners: Vec<OwnerRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub superadmin: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRecord {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Sólo se manda al servidor si viene en el archivo
    #[serde(default)]
    pub content_access_mode_list: Option<String>,
}

impl OwnerRecord {
    /// Nombre para mensajes; cae al `name` si no hay displayName.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

pub fn load_data(path: &Path) -> Result<ImportData> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("JSON inválido en {}", path.display()))
}
