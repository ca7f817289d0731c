//! Scoped substitution of a remote callable, without any call log.

use tracing::debug;

use crate::error::Result;
use crate::reference::Reference;
use crate::session::Session;

/// Swaps a remote callable for injected source for the duration of a
/// scope; [`FunctionReplacement::restore`] puts the original back.
pub struct FunctionReplacement {
    session: Session,
    target: String,
    backup: Reference,
    restored: bool,
}

impl FunctionReplacement {
    /// Snapshot `target`, inject `source` (which must define
    /// `replacement_name`), and rebind `target` to the injected callable.
    pub async fn install(
        session: &Session,
        target: &str,
        source: &str,
        replacement_name: &str,
    ) -> Result<Self> {
        let backup = session.ref_to(target).copy().await?;

        session.execute_code(source).await?;
        // snapshot the replacement too, so later redefinitions of its
        // name cannot leak into the scope
        let injected = session.ref_to(replacement_name).copy().await?;
        let code = session.codegen().assign(target, injected.root_name());
        session.execute_code(&code).await?;
        debug!(target, replacement = replacement_name, "replacement installed");

        Ok(Self {
            session: session.clone(),
            target: target.to_string(),
            backup,
            restored: false,
        })
    }

    /// Rebind the target to the pre-install snapshot. Idempotent.
    pub async fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        let code = self
            .session
            .codegen()
            .assign(&self.target, self.backup.root_name());
        self.session.execute_code(&code).await?;
        self.restored = true;
        debug!(target = %self.target, "replacement restored");
        Ok(())
    }
}
