use crate::{Error, ExportArtifact, ExportRequest, Exporter, Launcher, Result, Scene};
use futures::future::join_all;
use log::error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

/// An async-friendly exporter backed by worker threads.
///
/// Each call runs the synchronous pipeline on its own thread (and therefore
/// with its own engine instance) and hands the result back over a oneshot
/// channel. Dropping the returned future does not abort the worker: it still
/// finishes and releases its engine and staged document.
///
/// The worker thread hosts the engine, so a worker that cannot be spawned is
/// reported as [`Error::EngineLaunch`]. A worker that panics has released its
/// session through unwinding but produced no snapshot, which is reported as
/// [`Error::Capture`]; the panic message is logged.
pub struct AsyncExporter<L> {
    inner: Arc<Exporter<L>>,
}

impl<L> Clone for AsyncExporter<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: Launcher + 'static> AsyncExporter<L> {
    pub fn new(exporter: Exporter<L>) -> Self {
        Self {
            inner: Arc::new(exporter),
        }
    }

    pub fn exporter(&self) -> &Exporter<L> {
        &self.inner
    }

    /// Export on a background worker
    pub async fn export(&self, scene: Arc<Scene>, request: ExportRequest) -> Result<ExportArtifact> {
        let (tx, rx) = oneshot::channel();
        let exporter = self.inner.clone();

        thread::Builder::new()
            .name(format!("mapexport-{}", request.correlation_id))
            .spawn(move || {
                let id = request.correlation_id.clone();
                let res = panic::catch_unwind(AssertUnwindSafe(|| exporter.export(&scene, &request)))
                    .unwrap_or_else(|payload| {
                        let reason = panic_message(payload.as_ref());
                        error!("[{}] export worker panicked: {}", id, reason);
                        Err(Error::Capture(format!("export worker panicked: {}", reason)))
                    });
                // The receiver may be gone if the caller lost interest.
                let _ = tx.send(res);
            })
            .map_err(|e| {
                error!("cannot spawn export worker: {}", e);
                Error::EngineLaunch(format!("Failed to spawn export worker: {}", e))
            })?;

        rx.await
            .map_err(|e| Error::Capture(format!("Export worker ended without a result: {}", e)))?
    }

    /// Run several exports of one scene concurrently, one engine each.
    /// Results come back in request order.
    pub async fn export_all(&self, scene: Arc<Scene>, requests: Vec<ExportRequest>) -> Vec<Result<ExportArtifact>> {
        let jobs = requests
            .into_iter()
            .map(|request| self.export(scene.clone(), request));
        join_all(jobs).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let payload = panic::catch_unwind(|| panic!("static reason")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static reason");
        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }
}
