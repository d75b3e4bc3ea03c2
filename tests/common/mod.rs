#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use reconcile::{BackendAdapter, BackendError, CancelToken, Candidate, ColumnMetadata, PropertyRequest, Query};

/// Scripted behaviour for one query text.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub candidates: Vec<Candidate>,
    pub error: Option<BackendError>,
    pub delay: Duration,
    /// Keep sleeping after cancellation, like a backend stuck in I/O.
    pub ignore_cancel: bool,
}

impl Script {
    pub fn candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    pub fn error(error: BackendError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stubborn(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }
}

/// Adapter that answers from scripts and counts calls per query text.
///
/// Unscripted queries return one candidate `id:<text>` scoring 0.5.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    /// When set, `column_metadata` sleeps this long and ignores cancellation.
    metadata_delay: Mutex<Option<Duration>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, text: &str, script: Script) {
        self.scripts.lock().unwrap().insert(text.to_string(), script);
    }

    pub fn describe_slowly(&self, delay: Duration) {
        *self.metadata_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn resolve(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<Candidate>, BackendError> {
        let text = query.query_text().to_string();
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(text.clone()).or_default() += 1;

        let script = self.scripts.lock().unwrap().get(&text).cloned();
        let Some(script) = script else {
            return Ok(vec![Candidate::new(format!("id:{text}"), text, 0.5)]);
        };

        let until = Instant::now() + script.delay;
        while Instant::now() < until {
            if !script.ignore_cancel {
                cancel.check()?;
            }
            thread::sleep(Duration::from_millis(2));
        }

        match script.error {
            Some(e) => Err(e),
            None => Ok(script.candidates),
        }
    }

    fn column_metadata(&self, property: &PropertyRequest) -> Result<ColumnMetadata, BackendError> {
        let Some(delay) = *self.metadata_delay.lock().unwrap() else {
            return Err(BackendError::not_implemented("column_metadata", "scripted"));
        };
        thread::sleep(delay);
        Ok(ColumnMetadata {
            id: property.id.clone(),
            name: format!("{} label", property.id),
            type_ref: None,
        })
    }
}

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
