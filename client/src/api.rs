use anyhow::Result;
use orchestrator::Failure;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;
use crate::records::{OwnerRecord, UserRecord};

/* --------- Payloads REST de Candlepin --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_access_mode_list: Option<String>,
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
}

impl From<&OwnerRecord> for Owner {
    fn from(record: &OwnerRecord) -> Self {
        Self {
            key: record.name.clone(),
            display_name: record.display_name.clone(),
            content_access_mode_list: record.content_access_mode_list.clone(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreationRequest {
    pub username: String,
    pub password: String,
    pub super_admin: bool,
}

impl From<&UserRecord> for UserCreationRequest {
    fn from(record: &UserRecord) -> Self {
        Self {
            username: record.username.clone(),
            password: record.password.clone(),
            super_admin: record.superadmin,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub super_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationKey {
    pub name: String,
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
}

impl ActivationKey {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
        }
    }
}

/* --------- Cliente --------- */

/// Cliente JSON con basic auth contra la API REST de Candlepin.
///
/// Cada llamada devuelve el registro creado o un [`Failure`] cuyo código es
/// el status HTTP ("409", "500", ...), `"transport"` si no hubo respuesta o
/// `"decode"` si la respuesta no se pudo leer.
#[derive(Clone)]
pub struct CandlepinApi {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl CandlepinApi {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self::with_client(settings.http_client()?, settings))
    }

    pub fn with_client(http: Client, settings: &Settings) -> Self {
        Self {
            http,
            base_url: settings.base_url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    pub async fn create_owner(&self, owner: &Owner) -> Result<Owner, Failure> {
        self.post("/owners", owner).await
    }

    pub async fn create_user(&self, user: &UserCreationRequest) -> Result<User, Failure> {
        self.post("/users", user).await
    }

    pub async fn create_activation_key(
        &self,
        owner_key: &str,
        key: &ActivationKey,
    ) -> Result<ActivationKey, Failure> {
        self.post(&format!("/owners/{owner_key}/activation_keys"), key)
            .await
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, Failure>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .map_err(|e| Failure::new("transport", format!("POST {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Failure::new(
                status.as_u16().to_string(),
                format!("POST {path} devolvió {status}: {body}"),
            ));
        }

        resp.json::<R>()
            .await
            .map_err(|e| Failure::new("decode", format!("respuesta de POST {path}: {e}")))
    }
}
