use tokio::sync::oneshot;

use crate::{CancellationToken, TaskError};

/// Handle to a blocking job running on one of the worker pools.
pub struct BlockingTask<T> {
    token: CancellationToken,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> BlockingTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        rx: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, rx }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Await the result; resolves early with `Cancelled` when the token
    /// fires.
    pub async fn join(self) -> Result<T, TaskError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TaskError::Cancelled),
            result = self.rx => match result {
                Ok(result) => result,
                Err(_) => Err(TaskError::Panicked),
            }
        }
    }

    /// Block the current (non-runtime) thread until the job settles.
    pub fn wait(self) -> Result<T, TaskError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(TaskError::Panicked),
        }
    }
}
