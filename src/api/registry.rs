//! Purpose: Own every live session container, keyed by session key.
//! Exports: `SessionRegistry`, `SessionHandle`, `ShutdownReport`.
//! Role: Lazy create-and-restore on first use; write-through saves; bulk shutdown.
//! Invariants: Exactly one container exists per key; its snapshot loads at most once.
//! Invariants: Restoring one key never holds the map lock, so other keys stay reachable.
//! Invariants: `interpret` never fails; persistence problems are logged, not returned.
//! Invariants: Shutdown saves every session even when some saves fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::api::store::StateStore;
use crate::core::container::SessionContainer;
use crate::core::engine::EngineFactory;
use crate::core::error::Error;
use crate::core::result::InterpretResult;

pub type SessionHandle = Arc<Mutex<SessionContainer>>;

type SessionCell = Arc<OnceLock<SessionHandle>>;

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub saved: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SessionRegistry {
    store: StateStore,
    factory: Arc<dyn EngineFactory>,
    eager_save: bool,
    sessions: Mutex<HashMap<String, SessionCell>>,
}

impl SessionRegistry {
    pub fn new(store: StateStore, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            store,
            factory,
            eager_save: true,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// When disabled, namespaces are only written at shutdown.
    pub fn with_eager_save(mut self, eager_save: bool) -> Self {
        self.eager_save = eager_save;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Returns the container for `key`, creating and restoring it on first use.
    ///
    /// The map lock only covers claiming the key's cell. Concurrent first
    /// references wait on that cell, so they share one container and one load
    /// while lookups of other keys proceed.
    pub fn get_or_create(&self, key: &str) -> SessionHandle {
        let cell = Arc::clone(lock(&self.sessions).entry(key.to_string()).or_default());
        Arc::clone(cell.get_or_init(|| {
            let mut container = SessionContainer::new(key, self.factory.create());
            self.restore(&mut container);
            Arc::new(Mutex::new(container))
        }))
    }

    fn live(&self, key: &str) -> Option<SessionHandle> {
        lock(&self.sessions)
            .get(key)
            .and_then(|cell| cell.get())
            .cloned()
    }

    fn restore(&self, container: &mut SessionContainer) {
        let key = container.key().to_string();
        match self.store.load(&key) {
            Ok(Some(namespace)) => {
                tracing::info!(session = %key, entries = namespace.len(), "restored session state");
                container.install_namespace(namespace);
            }
            Ok(None) => {
                tracing::debug!(session = %key, "no saved state; starting empty");
            }
            Err(err) => {
                tracing::warn!(session = %key, error = %err, "could not load session state; starting empty");
            }
        }
    }

    pub fn interpret(&self, key: &str, text: &str) -> InterpretResult {
        let handle = self.get_or_create(key);
        let mut container = lock(&handle);
        let result = container.interpret(text);
        if self.eager_save {
            if let Some(namespace) = container.namespace() {
                if let Err(err) = self.store.save(key, namespace) {
                    tracing::error!(session = %key, error = %err, "could not save session state");
                }
            }
        }
        result
    }

    /// Variable names of `key`'s namespace that extend the word before `cursor`.
    /// Unknown sessions are not created.
    pub fn completion(&self, key: &str, buffer: &str, cursor: usize) -> Vec<String> {
        let Some(handle) = self.live(key) else {
            return Vec::new();
        };
        let prefix = completion_prefix(buffer, cursor);
        let container = lock(&handle);
        container
            .namespace()
            .map(|namespace| {
                namespace
                    .names()
                    .filter(|name| name.starts_with(prefix))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.sessions)
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Closes every session, saving its namespace, and clears the registry.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut drained: Vec<(String, SessionHandle)> = lock(&self.sessions)
            .drain()
            .filter_map(|(key, cell)| cell.get().cloned().map(|handle| (key, handle)))
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = ShutdownReport::default();
        for (key, handle) in drained {
            let mut container = lock(&handle);
            let namespace = container.namespace().cloned();
            container.close();
            let Some(namespace) = namespace else {
                continue;
            };
            match self.store.save(&key, &namespace) {
                Ok(_) => report.saved.push(key),
                Err(err) => {
                    tracing::error!(session = %key, error = %err, "could not save session state at shutdown");
                    report.failed.push((key, err));
                }
            }
        }
        tracing::info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            "session registry shut down"
        );
        report
    }
}

// Containers stay consistent across caught engine failures, so a poisoned
// lock still guards valid state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn completion_prefix(buffer: &str, cursor: usize) -> &str {
    let mut end = cursor.min(buffer.len());
    while !buffer.is_char_boundary(end) {
        end -= 1;
    }
    let head = &buffer[..end];
    let start = head
        .rfind(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
        .map(|index| index + 1)
        .unwrap_or(0);
    &head[start..]
}

#[cfg(test)]
mod tests {
    use super::{SessionRegistry, completion_prefix};
    use crate::api::store::StateStore;
    use crate::core::engine::{Engine, EngineFactory};
    use crate::core::error::ErrorKind;
    use crate::core::result::{ResultKind, Status};
    use crate::core::value::{Namespace, Value};
    use crate::script::ScriptEngine;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex, mpsc};

    struct CountingFactory {
        created: AtomicUsize,
    }

    impl EngineFactory for CountingFactory {
        fn create(&self) -> Box<dyn Engine> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptEngine::new())
        }
    }

    fn registry(dir: &Path) -> SessionRegistry {
        SessionRegistry::new(StateStore::new(dir), crate::script::script_engine_factory())
    }

    #[test]
    fn table_and_text_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());

        let result = registry.interpret("n", "a = [1, 2, 3]\nb = [4, 5]\ntable a b");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.kind, ResultKind::Table);
        assert_eq!(result.payload, "a\tb\n1\t4\n2\t5");

        let result = registry.interpret("n", "print $a");
        assert_eq!(result.kind, ResultKind::Text);
        assert_eq!(result.payload, "[1, 2, 3]\n");
    }

    #[test]
    fn scalar_list_return_is_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        let result = registry.interpret("n", "x = 1\nvars");
        assert_eq!(result.kind, ResultKind::Text);
        assert_eq!(result.payload, "x\n");
    }

    #[test]
    fn sessions_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        registry.interpret("A", "secret = alpha");
        let result = registry.interpret("B", "print $secret");
        assert_eq!(result.status, Status::Error);
        assert!(result.payload.contains("undefined variable"));
        registry.interpret("B", "secret = beta");
        assert_eq!(registry.interpret("A", "print $secret").payload, "alpha\n");
    }

    #[test]
    fn state_survives_a_new_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = registry(dir.path());
        first.interpret("note", "kept = yes");

        let second = registry(dir.path());
        assert_eq!(second.interpret("note", "print $kept").payload, "yes\n");
    }

    #[test]
    fn corrupt_state_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("note.state"), b"{\"schema\":").expect("write");
        let registry = registry(dir.path());

        let result = registry.interpret("note", "vars");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.payload, "");
    }

    #[test]
    fn concurrent_first_use_creates_one_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let store = StateStore::new(dir.path());
        let seeded: Namespace = [("seeded", Value::scalar("from-disk"))].into_iter().collect();
        store.save("shared", &seeded).expect("seed");
        let registry = SessionRegistry::new(store.clone(), factory.clone());
        let barrier = Barrier::new(8);

        let handles: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.get_or_create("shared")
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("join"))
                .collect()
        });

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.len(), 1);

        let restored = handles[0].lock().expect("lock").namespace().cloned();
        assert_eq!(restored, Some(seeded));

        // Later references reuse the restored container instead of reloading.
        let replaced: Namespace = [("seeded", Value::scalar("rewritten"))].into_iter().collect();
        store.save("shared", &replaced).expect("rewrite");
        let again = registry.get_or_create("shared");
        assert!(Arc::ptr_eq(&again, &handles[0]));
        assert_eq!(
            again.lock().expect("lock").namespace().and_then(|ns| ns.get_scalar("seeded")),
            Some("from-disk")
        );
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restoring_one_key_does_not_block_other_keys() {
        struct GatedFactory {
            gate: Mutex<Option<mpsc::Receiver<()>>>,
        }

        impl EngineFactory for GatedFactory {
            fn create(&self) -> Box<dyn Engine> {
                let gate = self.gate.lock().expect("gate").take();
                if let Some(gate) = gate {
                    let _ = gate.recv();
                }
                Box::new(ScriptEngine::new())
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let (release, gate) = mpsc::channel();
        let factory = Arc::new(GatedFactory {
            gate: Mutex::new(Some(gate)),
        });
        let registry = SessionRegistry::new(StateStore::new(dir.path()), factory.clone());

        let (result, keys_during) = std::thread::scope(|scope| {
            let slow = scope.spawn(|| registry.get_or_create("slow"));
            while factory.gate.lock().expect("gate").is_some() {
                std::thread::yield_now();
            }
            // "slow" is blocked mid-creation; another key must still be served.
            let result = registry.interpret("fast", "print ok");
            let keys_during = registry.session_keys();
            release.send(()).expect("release");
            slow.join().expect("join");
            (result, keys_during)
        });
        assert_eq!(result.payload, "ok\n");
        assert_eq!(keys_during, vec!["fast".to_string()]);
        assert_eq!(
            registry.session_keys(),
            vec!["fast".to_string(), "slow".to_string()]
        );
    }

    #[test]
    fn shutdown_saves_remaining_sessions_after_a_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path()).with_eager_save(false);
        registry.interpret("good", "x = 1");
        registry.interpret("../bad", "y = 2");
        assert!(!dir.path().join("good.state").exists());

        let report = registry.shutdown();
        assert_eq!(report.saved, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "../bad");
        assert_eq!(report.failed[0].1.kind(), ErrorKind::Usage);
        assert!(!report.is_clean());
        assert!(registry.is_empty());
        assert!(dir.path().join("good.state").exists());
    }

    #[test]
    fn handles_held_across_shutdown_report_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        let handle = registry.get_or_create("n");
        registry.shutdown();
        let result = handle.lock().expect("lock").interpret("x = 1");
        assert_eq!(result.status, Status::Error);
    }

    #[test]
    fn completion_matches_namespace_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        registry.interpret("n", "alpha = 1\nalps = 2\nbeta = 3");

        assert_eq!(
            registry.completion("n", "print $al", 9),
            vec!["alpha".to_string(), "alps".to_string()]
        );
        assert_eq!(registry.completion("n", "", 0).len(), 3);
        assert!(registry.completion("unknown", "al", 2).is_empty());
        assert_eq!(registry.session_keys(), vec!["n".to_string()]);
    }

    #[test]
    fn completion_prefix_respects_cursor() {
        assert_eq!(completion_prefix("show alpha", 7), "al");
        assert_eq!(completion_prefix("show alpha", 100), "alpha");
        assert_eq!(completion_prefix("x = $ab", 7), "ab");
        assert_eq!(completion_prefix("é", 1), "");
    }
}
