//! Scripted in-process kernel for exercising sessions without an
//! interpreter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::kernel::KernelTransport;
use crate::notebook::Output;

type Responder = Arc<dyn Fn(&str) -> Vec<Output> + Send + Sync>;

pub(crate) struct ScriptedKernel {
    pub log: Arc<Mutex<Vec<String>>>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    delay: Duration,
    fail_on: Option<String>,
    responder: Responder,
}

impl Default for ScriptedKernel {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            fail_on: None,
            responder: Arc::new(|_| Vec::new()),
        }
    }
}

impl ScriptedKernel {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Respond with an error output when the source contains `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn responding<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Vec<Output> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// A second kernel sharing this one's concurrency counters, so tests
    /// can observe overlap across sessions.
    pub fn sharing_counters(&self) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            active: self.active.clone(),
            max_active: self.max_active.clone(),
            delay: self.delay,
            fail_on: self.fail_on.clone(),
            responder: self.responder.clone(),
        }
    }
}

impl KernelTransport for ScriptedKernel {
    fn start(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn execute<'a>(
        &'a mut self,
        source: &'a str,
        _position: usize,
    ) -> BoxFuture<'a, Result<Vec<Output>>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(source.to_string());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(needle) = &self.fail_on {
                if source.contains(needle.as_str()) {
                    return Ok(vec![Output::Error {
                        ename: "RuntimeError".into(),
                        evalue: format!("scripted failure on {needle}"),
                        traceback: vec![],
                    }]);
                }
            }
            Ok((self.responder)(source))
        })
    }
}

/// An execute-result output carrying a transfer payload, as the Python
/// bootstrap would emit for `__nbt_encode(...)`.
pub(crate) fn payload_output(json_text: &str) -> Output {
    Output::ExecuteResult {
        data: [(
            crate::codec::PAYLOAD_MIME.to_string(),
            serde_json::Value::String(json_text.to_string()),
        )]
        .into_iter()
        .collect(),
    }
}
