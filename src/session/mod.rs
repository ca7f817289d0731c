//! Execution session: one interpreter process bound to one document,
//! with all cell executions serialized through a single async lock.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{CodeGen, PythonCodeGen};
use crate::error::{Error, Result};
use crate::kernel::{KernelTransport, PythonKernel};
use crate::notebook::{Cell, CellSelector, Document, Output};
use crate::reference::Reference;

/// Add a random suffix so injected auxiliary names never collide within
/// a session's lifetime.
pub(crate) fn randomize_name(base: &str) -> String {
    format!("_{base}_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub python: String,
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            timeout: Duration::from_secs(120),
        }
    }
}

enum KernelSlot {
    Pending(Box<dyn KernelTransport>),
    Running(Box<dyn KernelTransport>),
    Closed,
}

pub(crate) struct SessionInner {
    doc: StdMutex<Document>,
    // serializes cell executions; never held across document access
    kernel: Mutex<KernelSlot>,
    codegen: Box<dyn CodeGen>,
}

/// Cheap-to-clone handle to one interpreter session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Load a notebook from disk and bind a Python kernel to it. The
    /// kernel is not started until [`Session::start`].
    pub fn open(notebook: &Path, options: &SessionOptions) -> Result<Self> {
        let doc = Document::load(notebook)?;
        Ok(Self::with_transport(
            doc,
            Box::new(PythonKernel::new(&options.python, options.timeout)),
            Box::new(PythonCodeGen),
        ))
    }

    /// Bind an arbitrary transport and code generator, for alternate
    /// interpreter backends and for tests.
    pub fn with_transport(
        doc: Document,
        transport: Box<dyn KernelTransport>,
        codegen: Box<dyn CodeGen>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                doc: StdMutex::new(doc),
                kernel: Mutex::new(KernelSlot::Pending(transport)),
                codegen,
            }),
        }
    }

    pub(crate) fn codegen(&self) -> &dyn CodeGen {
        self.inner.codegen.as_ref()
    }

    pub(crate) fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start the interpreter. Errors if already started or shut down.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.inner.kernel.lock().await;
        match std::mem::replace(&mut *slot, KernelSlot::Closed) {
            KernelSlot::Pending(mut transport) => {
                transport.start().await?;
                *slot = KernelSlot::Running(transport);
                Ok(())
            }
            state @ KernelSlot::Running(_) => {
                *slot = state;
                Err(Error::lifecycle("session already started"))
            }
            KernelSlot::Closed => Err(Error::lifecycle("session already shut down")),
        }
    }

    /// Tear the interpreter down. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let mut slot = self.inner.kernel.lock().await;
        match std::mem::replace(&mut *slot, KernelSlot::Closed) {
            KernelSlot::Running(mut transport) => transport.stop().await,
            KernelSlot::Pending(_) | KernelSlot::Closed => Ok(()),
        }
    }

    /// Snapshot of all cells.
    pub fn cells(&self) -> Vec<Cell> {
        self.inner.doc.lock().expect("document lock").cells().to_vec()
    }

    /// Snapshot of the code cells matched by `selector`.
    pub fn cells_matching(&self, selector: &CellSelector) -> Vec<Cell> {
        let doc = self.inner.doc.lock().expect("document lock");
        doc.matching(selector)
            .into_iter()
            .map(|i| doc.cells()[i].clone())
            .collect()
    }

    /// Execute one cell under the session lock and return its snapshot.
    /// Outputs are stored even when the interpreter raised.
    async fn run_cell(&self, index: usize) -> Result<Cell> {
        let source = {
            let doc = self.inner.doc.lock().expect("document lock");
            doc.cell(index)
                .ok_or_else(|| Error::lifecycle(format!("no cell at index {index}")))?
                .source
                .clone()
        };

        let mut slot = self.inner.kernel.lock().await;
        let transport = Self::running_transport(&mut slot)?;
        self.execute_under_lock(transport, index, &source).await
    }

    /// Append a synthesized cell with `source` and execute it. The cell
    /// is appended only once the kernel lock is held and the session
    /// confirmed running, so cancellation while queued and lifecycle
    /// misuse both leave the document untouched.
    pub async fn execute_code(&self, source: &str) -> Result<Cell> {
        let mut slot = self.inner.kernel.lock().await;
        let transport = Self::running_transport(&mut slot)?;
        let index = {
            let mut doc = self.inner.doc.lock().expect("document lock");
            doc.append_code(source)
        };
        debug!(index, "executing injected code");
        self.execute_under_lock(transport, index, source).await
    }

    fn running_transport(slot: &mut KernelSlot) -> Result<&mut dyn KernelTransport> {
        match slot {
            KernelSlot::Running(t) => Ok(t.as_mut()),
            KernelSlot::Pending(_) => Err(Error::lifecycle("session not started")),
            KernelSlot::Closed => Err(Error::lifecycle("session already shut down")),
        }
    }

    async fn execute_under_lock(
        &self,
        transport: &mut dyn KernelTransport,
        index: usize,
        source: &str,
    ) -> Result<Cell> {
        let outputs = transport.execute(source, index).await?;

        let failure = outputs.iter().find_map(|o| match o {
            Output::Error {
                ename,
                evalue,
                traceback,
            } => Some(Error::Remote {
                name: ename.clone(),
                message: evalue.clone(),
                trace: traceback.clone(),
            }),
            _ => None,
        });

        let snapshot = {
            let mut doc = self.inner.doc.lock().expect("document lock");
            doc.set_outputs(index, outputs);
            doc.cell(index).expect("cell exists").clone()
        };

        match failure {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }

    /// Execute the matched cells in document order. A remote error aborts
    /// the batch; already-executed cells keep their captured output.
    pub async fn execute_cells(&self, selector: &CellSelector) -> Result<Vec<Cell>> {
        let indices = {
            let doc = self.inner.doc.lock().expect("document lock");
            doc.matching(selector)
        };

        let mut executed = Vec::with_capacity(indices.len());
        for index in indices {
            executed.push(self.run_cell(index).await?);
        }
        Ok(executed)
    }

    /// Execute the first matched cell; [`Error::CellNotFound`] otherwise.
    pub async fn execute_cell(&self, selector: &CellSelector) -> Result<Cell> {
        let index = {
            let doc = self.inner.doc.lock().expect("document lock");
            doc.first_matching(selector)?
        };
        self.run_cell(index).await
    }

    /// Execute the cell at `index` (used when replaying a document
    /// cell-by-cell).
    pub async fn execute_cell_at(&self, index: usize) -> Result<Cell> {
        self.run_cell(index).await
    }

    /// Read a script from disk and execute it as a synthesized cell.
    pub async fn execute_script(&self, path: &Path) -> Result<Cell> {
        let source = tokio::fs::read_to_string(path).await?;
        self.execute_code(&source).await
    }

    /// Lazy reference to a remote name. Composing it never touches the
    /// interpreter.
    pub fn ref_to(&self, name: &str) -> Reference {
        Reference::root(self.clone(), name)
    }

    pub fn refs<'a, I>(&self, names: I) -> Vec<Reference>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().map(|n| self.ref_to(n)).collect()
    }

    /// Snapshot a remote name under a randomized alias and return a
    /// reference to the alias.
    pub async fn get(&self, name: &str) -> Result<Reference> {
        self.ref_to(name).copy().await
    }

    pub async fn gets<'a, I>(&self, names: I) -> Result<Vec<Reference>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        try_join_all(names.into_iter().map(|n| self.get(n))).await
    }

    /// Push a local value into the session under `name` (randomized when
    /// omitted) and return a reference to it.
    pub async fn store_value(&self, value: &Value, name: Option<&str>) -> Result<Reference> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| randomize_name("stored"));
        let literal = self.codegen().literal(value)?;
        self.execute_code(&self.codegen().assign(&name, &literal))
            .await?;
        Ok(self.ref_to(&name))
    }

    /// Bring a reference's value into this session. A same-session
    /// reference is snapshotted via copy; a foreign one is relayed as a
    /// raw payload, never textually embedded.
    pub async fn store_ref(&self, value: &Reference, name: Option<&str>) -> Result<Reference> {
        if value.is_from(self) {
            return value.copy_named(name).await;
        }
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| randomize_name("stored"));
        let payload = value.receive_raw().await?;
        let literal = self.codegen().payload_literal(&payload);
        self.execute_code(&self.codegen().assign(&name, &literal))
            .await?;
        Ok(self.ref_to(&name))
    }
}
