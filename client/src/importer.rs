use anyhow::{Context, Result};
use orchestrator::{
    log_failure, Aggregate, BatchScheduler, Chain, CompletionBarrier, Failure, ReasonTable, Task,
    WorkerPool,
};
use tracing::{debug, info};

use crate::api::{ActivationKey, CandlepinApi, Owner, UserCreationRequest};
use crate::config::Settings;
use crate::records::{ImportData, OwnerRecord, UserRecord};

/// Activation keys que se crean en cada owner importado, en este orden.
pub const DEFAULT_ACTIVATION_KEYS: [&str; 2] = ["default_key", "awesome_os_pool"];

pub struct Importer {
    api: CandlepinApi,
    scheduler: BatchScheduler,
    barrier: CompletionBarrier,
}

impl Importer {
    pub fn new(api: CandlepinApi, settings: &Settings) -> Self {
        let scheduler = BatchScheduler::new(WorkerPool::with_limit(settings.concurrency));
        let barrier = CompletionBarrier::new(settings.deadline).with_pool(scheduler.pool().clone());
        Self {
            api,
            scheduler,
            barrier,
        }
    }

    /// Usuarios primero y después owners; cada fase es un lote aparte con
    /// su propio plazo. Si un lote vence, se corta todo el import.
    pub async fn import(&self, data: &ImportData) -> Result<()> {
        self.import_users(&data.users).await?;
        self.import_owners(&data.owners).await?;
        Ok(())
    }

    pub async fn import_users(&self, users: &[UserRecord]) -> Result<Aggregate> {
        let chains: Vec<Chain> = users.iter().map(|u| self.user_chain(u)).collect();
        self.run_batch("usuarios", chains).await
    }

    pub async fn import_owners(&self, owners: &[OwnerRecord]) -> Result<Aggregate> {
        let chains: Vec<Chain> = owners.iter().map(|o| self.owner_chain(o)).collect();
        self.run_batch("owners", chains).await
    }

    fn user_chain(&self, record: &UserRecord) -> Chain {
        info!("importando usuario {}", record.username);

        let api = self.api.clone();
        let request = UserCreationRequest::from(record);
        let conflicts =
            ReasonTable::new().with("409", format!("el usuario {} ya existe", request.username));

        Chain::from_root(Task::new(move || async move {
            let user = api.create_user(&request).await?;
            debug!(
                "usuario {} creado (superadmin={})",
                user.username, user.super_admin
            );
            Ok::<_, Failure>(user)
        }))
        .on_failure(log_failure(conflicts))
        .build()
    }

    /// Owner como raíz y sus activation keys como continuación: las keys
    /// necesitan que el owner ya exista en el servidor.
    fn owner_chain(&self, record: &OwnerRecord) -> Chain {
        info!("importando owner {}", record.name);

        let display_name = record.display_name().to_string();
        let owner = Owner::from(record);
        let owner_conflicts = ReasonTable::new().with(
            "409",
            format!("no se pudo crear el owner {display_name}"),
        );
        let key_conflicts = ReasonTable::new().with(
            "409",
            format!("no se pudieron crear las activation keys de {display_name}"),
        );

        let api = self.api.clone();
        let keys_api = self.api.clone();

        Chain::from_root(Task::new(move || async move { api.create_owner(&owner).await }))
            .on_failure(log_failure(owner_conflicts))
            .then(move |created: &Owner| {
                let owner_key = created.key.clone();
                info!(
                    "creado {} (id={})",
                    owner_key,
                    created.id.as_deref().unwrap_or("-")
                );
                async move {
                    let mut keys = Vec::with_capacity(DEFAULT_ACTIVATION_KEYS.len());
                    for name in DEFAULT_ACTIVATION_KEYS {
                        let key = keys_api
                            .create_activation_key(&owner_key, &ActivationKey::named(name))
                            .await?;
                        debug!(
                            "activation key {} creada en {} (id={:?})",
                            key.name, owner_key, key.id
                        );
                        keys.push(key);
                    }
                    Ok::<_, Failure>(keys)
                }
            })
            .on_failure(log_failure(key_conflicts))
            .build()
    }

    async fn run_batch(&self, label: &str, chains: Vec<Chain>) -> Result<Aggregate> {
        let handles = self
            .scheduler
            .submit_all(chains)
            .with_context(|| format!("no se pudo enviar el lote de {label}"))?;
        debug!(
            "esperando {} cadenas de {} (plazo {:?})",
            handles.len(),
            label,
            self.barrier.deadline()
        );

        let aggregate = self.barrier.await_all(&handles).await;
        info!(
            "{}: {}/{} importados",
            label,
            aggregate.fulfilled_count(),
            aggregate.len()
        );

        aggregate
            .into_result()
            .with_context(|| format!("la importación de {label} no terminó a tiempo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use serde_json::json;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Logs del import capturados en memoria, una línea por evento.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .without_time()
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn lines_with(&self, level: &str) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|l| l.contains(level))
                .map(str::to_string)
                .collect()
        }
    }

    fn importer_for(server: &MockServer, deadline: Duration) -> Importer {
        let settings = Settings {
            base_url: server.uri(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            ca_cert: "/no/existe".into(),
            concurrency: None,
            deadline,
        };
        Importer::new(CandlepinApi::with_client(Client::new(), &settings), &settings)
    }

    fn user(name: &str) -> UserRecord {
        UserRecord {
            username: name.to_string(),
            password: "secret".to_string(),
            superadmin: false,
        }
    }

    fn owner(name: &str) -> OwnerRecord {
        OwnerRecord {
            name: name.to_string(),
            display_name: Some(format!("Owner {name}")),
            content_access_mode_list: None,
        }
    }

    async fn mount_activation_keys(server: &MockServer, owner_key: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/owners/{owner_key}/activation_keys")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "k", "name": "default_key"})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn usuario_existente_no_frena_a_los_demas() {
        let captured = Captured::default();
        let _guard = captured.install();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(body_partial_json(json!({"username": "admin"})))
            .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(body_partial_json(json!({"username": "bob"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"username": "bob", "superAdmin": false})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let importer = importer_for(&server, Duration::from_secs(5));
        let aggregate = importer
            .import_users(&[user("admin"), user("bob")])
            .await
            .unwrap();

        assert_eq!(aggregate.fulfilled, vec![false, true]);
        let warns = captured.lines_with("WARN");
        assert_eq!(warns.len(), 1);
        assert!(warns[0].contains("el usuario admin ya existe"));
        assert!(captured.lines_with("ERROR").is_empty());
    }

    #[tokio::test]
    async fn owner_creado_recibe_sus_activation_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/owners"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "o1", "key": "snowwhite"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_activation_keys(&server, "snowwhite", 2).await;

        let importer = importer_for(&server, Duration::from_secs(5));
        let aggregate = importer.import_owners(&[owner("snowwhite")]).await.unwrap();

        assert_eq!(aggregate.fulfilled, vec![true]);
    }

    #[tokio::test]
    async fn owner_en_conflicto_no_crea_activation_keys() {
        let captured = Captured::default();
        let _guard = captured.install();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/owners"))
            .and(body_partial_json(json!({"key": "taken"})))
            .respond_with(ResponseTemplate::new(409).set_body_string("owner exists"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/owners"))
            .and(body_partial_json(json!({"key": "fresh"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "o2", "key": "fresh"})),
            )
            .mount(&server)
            .await;
        mount_activation_keys(&server, "taken", 0).await;
        mount_activation_keys(&server, "fresh", 2).await;

        let importer = importer_for(&server, Duration::from_secs(5));
        let aggregate = importer
            .import_owners(&[owner("taken"), owner("fresh")])
            .await
            .unwrap();

        assert_eq!(aggregate.fulfilled, vec![false, true]);
        // Un solo warning, el del owner: la continuación omitida no loguea
        let warns = captured.lines_with("WARN");
        assert_eq!(warns.len(), 1);
        assert!(warns[0].contains("no se pudo crear el owner Owner taken"));
        assert!(!warns[0].contains("activation keys"));
        assert!(captured.lines_with("ERROR").is_empty());
    }

    #[tokio::test]
    async fn falla_en_activation_keys_marca_la_cadena_como_fallida() {
        let captured = Captured::default();
        let _guard = captured.install();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/owners"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "o3", "key": "dup"})),
            )
            .mount(&server)
            .await;
        // La primera key choca: la segunda ya no se intenta
        Mock::given(method("POST"))
            .and(path("/owners/dup/activation_keys"))
            .respond_with(ResponseTemplate::new(409).set_body_string("key exists"))
            .expect(1)
            .mount(&server)
            .await;

        let importer = importer_for(&server, Duration::from_secs(5));
        let aggregate = importer.import_owners(&[owner("dup")]).await.unwrap();

        assert_eq!(aggregate.fulfilled, vec![false]);
        let warns = captured.lines_with("WARN");
        assert_eq!(warns.len(), 1);
        assert!(warns[0].contains("no se pudieron crear las activation keys de Owner dup"));
        assert!(!warns[0].contains("no se pudo crear el owner"));
        assert!(captured.lines_with("ERROR").is_empty());
    }

    #[tokio::test]
    async fn lote_que_no_termina_a_tiempo_corta_el_import() {
        let captured = Captured::default();
        let _guard = captured.install();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"username": "slow"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let importer = importer_for(&server, Duration::from_millis(200));
        let data = ImportData {
            users: vec![user("slow")],
            owners: vec![owner("never")],
        };
        let err = importer.import(&data).await.unwrap_err();

        assert!(format!("{err:#}").contains("usuarios no terminó a tiempo"));
        // El vencimiento sale una sola vez, como error de `main`
        assert!(captured.lines_with("WARN").is_empty());
        assert!(captured.lines_with("ERROR").is_empty());
    }

    #[tokio::test]
    async fn import_vacio_no_toca_el_servidor() {
        let server = MockServer::start().await;
        let importer = importer_for(&server, Duration::from_secs(1));

        importer.import(&ImportData::default()).await.unwrap();

        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
