use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;

use crate::error::Failure;
use crate::task::{
    panic_message, Launch, Schedule, Task, TaskCore, TaskHandle, TaskId, TaskPhase,
};

/* ---------------- continuaciones ---------------- */

impl<T: Send + Sync + 'static> Task<T> {
    /// Crea una tarea hija que arranca sólo cuando esta termina en Fulfilled.
    ///
    /// `build` recibe el valor del padre y arma la unidad de trabajo del hijo,
    /// así el hijo puede usar IDs u objetos que el padre acaba de crear.
    /// Si el padre termina rechazado, `build` nunca se llama y el hijo queda
    /// en `Skipped`.
    pub fn on_success<U, B, Fut>(&self, build: B) -> Task<U>
    where
        U: Send + Sync + 'static,
        B: FnOnce(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, Failure>> + Send + 'static,
    {
        let parent = Arc::clone(&self.core);
        let gate = async move {
            let mut phase = parent.phase.subscribe();
            let terminal = match phase.wait_for(|p| p.is_terminal()).await {
                Ok(p) => *p,
                Err(_) => TaskPhase::Skipped,
            };
            let value = match (terminal, parent.outcome.get()) {
                (TaskPhase::Fulfilled, Some(Ok(value))) => value,
                _ => return None,
            };
            // Un panic al armar el hijo lo rechaza igual que uno en su trabajo
            let work = match catch_unwind(AssertUnwindSafe(|| build(value))) {
                Ok(work) => work.boxed(),
                Err(panic) => {
                    let failure = Failure::new("panic", panic_message(panic.as_ref()));
                    async move { Err(failure) }.boxed()
                }
            };
            Some(work)
        }
        .boxed();

        Task {
            core: Arc::new(TaskCore::new(Launch::Gated(gate), Some(self.schedule()))),
        }
    }

    /// Registra un observador que corre como mucho una vez, cuando la tarea
    /// pasa a Rejected. No cambia el resultado de la tarea.
    pub fn on_failure<F>(&self, observer: F) -> &Self
    where
        F: FnOnce(&Failure) + Send + 'static,
    {
        self.core.add_observer(Box::new(observer));
        self
    }
}

/* ---------------- cadenas ---------------- */

/// Una tarea raíz más sus continuaciones, lista para el scheduler.
/// Se consume al enviarla: las cadenas son de un solo uso.
pub struct Chain {
    root: TaskId,
    pub(crate) tasks: Vec<Arc<dyn Schedule>>,
    pub(crate) terminal: TaskHandle,
}

impl Chain {
    pub fn from_root<T: Send + Sync + 'static>(root: Task<T>) -> ChainBuilder<T> {
        ChainBuilder {
            root: root.id(),
            tasks: vec![root.schedule()],
            last: root,
        }
    }

    /// Identidad de la cadena (la de su raíz).
    pub fn id(&self) -> TaskId {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Handle de la última tarea de la cadena.
    pub fn terminal(&self) -> &TaskHandle {
        &self.terminal
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("root", &self.root)
            .field("tasks", &self.tasks.len())
            .field("terminal", &self.terminal)
            .finish()
    }
}

pub struct ChainBuilder<T> {
    root: TaskId,
    tasks: Vec<Arc<dyn Schedule>>,
    last: Task<T>,
}

impl<T: Send + Sync + 'static> ChainBuilder<T> {
    /// Agrega una continuación sobre la última tarea de la cadena.
    pub fn then<U, B, Fut>(mut self, build: B) -> ChainBuilder<U>
    where
        U: Send + Sync + 'static,
        B: FnOnce(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, Failure>> + Send + 'static,
    {
        let child = self.last.on_success(build);
        self.tasks.push(child.schedule());
        ChainBuilder {
            root: self.root,
            tasks: self.tasks,
            last: child,
        }
    }

    /// Observador de fallo sobre la última tarea agregada.
    pub fn on_failure<F>(self, observer: F) -> Self
    where
        F: FnOnce(&Failure) + Send + 'static,
    {
        self.last.on_failure(observer);
        self
    }

    pub fn last(&self) -> &Task<T> {
        &self.last
    }

    pub fn build(self) -> Chain {
        Chain {
            root: self.root,
            tasks: self.tasks,
            terminal: self.last.handle(),
        }
    }
}

impl<T: Send + Sync + 'static> From<ChainBuilder<T>> for Chain {
    fn from(builder: ChainBuilder<T>) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkerPool;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn start_all(chain: &Chain) {
        let pool = WorkerPool::unbounded();
        for task in &chain.tasks {
            Arc::clone(task).start(&pool).unwrap();
        }
    }

    #[tokio::test]
    async fn hijo_recibe_el_valor_del_padre() {
        let parent = Task::new(|| async { Ok::<_, Failure>("owner-1".to_string()) });
        let child = parent.on_success(|key: &String| {
            let key = key.clone();
            async move { Ok::<_, Failure>(format!("{key}/default_key")) }
        });

        let chain = Chain::from_root(parent.clone()).build();
        start_all(&chain);
        child.schedule().start(&WorkerPool::unbounded()).unwrap();

        let phase = child.handle().wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(phase, TaskPhase::Fulfilled);
        assert_eq!(child.value().map(String::as_str), Some("owner-1/default_key"));
    }

    #[tokio::test]
    async fn hijo_se_omite_si_el_padre_falla() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let chain = Chain::from_root(Task::new(|| async {
            Err::<u32, _>(Failure::new("409", "ya existe"))
        }))
        .then(move |_: &u32| {
            flag.store(true, Ordering::SeqCst);
            async { Ok::<_, Failure>(()) }
        })
        .build();
        start_all(&chain);

        let phase = chain.terminal().wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(phase, TaskPhase::Skipped);
        assert!(!chain.terminal().is_fulfilled());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn hijo_no_arranca_mientras_el_padre_corre() {
        let events = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&events);
        let on_fail = Arc::clone(&events);
        let child_log = Arc::clone(&events);
        let chain = Chain::from_root(Task::new(move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            log.lock().unwrap().push("padre");
            Ok::<_, Failure>(1)
        }))
        .on_failure(move |_| on_fail.lock().unwrap().push("observador"))
        .then(move |_: &i32| async move {
            child_log.lock().unwrap().push("hijo");
            Ok::<_, Failure>(2)
        })
        .build();
        start_all(&chain);

        chain.terminal().wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["padre", "hijo"]);
    }

    #[tokio::test]
    async fn observadores_del_padre_corren_antes_de_omitir_al_hijo() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_fail = Arc::clone(&events);

        let chain = Chain::from_root(Task::new(|| async {
            Err::<(), _>(Failure::new("500", "x"))
        }))
        .on_failure(move |_| on_fail.lock().unwrap().push("observador"))
        .then(|_: &()| async { Ok::<_, Failure>(()) })
        .build();
        start_all(&chain);

        let phase = chain.terminal().wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(phase, TaskPhase::Skipped);
        assert_eq!(*events.lock().unwrap(), vec!["observador"]);
    }

    #[test]
    fn cadena_guarda_raiz_y_terminal() {
        let root = Task::new(|| async { Ok::<_, Failure>(()) });
        let root_id = root.id();
        let builder = Chain::from_root(root)
            .then(|_: &()| async { Ok::<_, Failure>(1_u8) })
            .then(|_: &u8| async { Ok::<_, Failure>("fin") });
        let last_id = builder.last().id();
        let chain = builder.build();

        assert_eq!(chain.id(), root_id);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.terminal().id(), last_id);
        assert_eq!(chain.terminal().phase(), TaskPhase::Pending);
    }
}
