//! Resume loop: turns coordinator resumptions into state callbacks.

use tandem_waiter::Resumption;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;

/// Consumes resumptions from the coordinator and resumes each waiting
/// instance on its own task.
///
/// Created by [`Engine::run`].
pub(crate) struct ResumeRunner {
  engine: Engine,
  receiver: mpsc::UnboundedReceiver<Resumption>,
}

impl ResumeRunner {
  pub(crate) fn new(engine: Engine, receiver: mpsc::UnboundedReceiver<Resumption>) -> Self {
    Self { engine, receiver }
  }

  /// Runs until the cancellation token fires or the channel closes.
  pub(crate) async fn start(mut self, cancel: CancellationToken) {
    info!("starting resume runner");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("resume runner cancelled");
          break;
        }
        resumption = self.receiver.recv() => {
          match resumption {
            Some(resumption) => {
              debug!(
                instance_id = %resumption.instance_id,
                responses = resumption.responses.len(),
                "resuming instance"
              );
              let engine = self.engine.clone();
              tokio::spawn(async move {
                engine.resume(resumption).await;
              });
            }
            None => {
              info!("resume runner channel closed");
              break;
            }
          }
        }
      }
    }
  }
}
