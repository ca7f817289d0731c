//! Interpreter process management and the execution transport seam.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::notebook::Output;

pub mod python;

pub use python::PythonKernel;

/// The "execute source, return structured outputs" primitive backing a
/// session: one interpreter process, driven synchronously per call.
///
/// Implemented with boxed futures so sessions can hold the transport as a
/// trait object.
pub trait KernelTransport: Send {
    fn start(&mut self) -> BoxFuture<'_, Result<()>>;

    fn stop(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Execute `source` as the cell at `position` and return its raw
    /// outputs. An interpreter-level exception is reported as an
    /// [`Output::Error`] entry, not as an `Err`.
    fn execute<'a>(
        &'a mut self,
        source: &'a str,
        position: usize,
    ) -> BoxFuture<'a, Result<Vec<Output>>>;
}
