//! The handshake between a queued request and the bucket dispatcher that
//! admits it.
//!
//! [`channel`] returns a [`Ticket`] (held by the caller enqueuing a request)
//! and a [`BucketHandle`] (held by the bucket's dispatcher loop, pushed onto
//! its priority queue). The bucket resolves the handle's admission signal
//! once it is the ticket's turn; the caller then performs its HTTP call and
//! reports the outcome back through the same ticket so the bucket can
//! re-tune itself. The outcome payload type `T` is generic so this crate's
//! queueing mechanics stay independent of exactly what the REST engine
//! chooses to report back (parsed headers, rate-limit status, or both).

use tokio::sync::oneshot::{self, error::RecvError};

/// Held by the caller enqueuing a request.
#[derive(Debug)]
pub struct Ticket<T> {
    admitted: oneshot::Receiver<()>,
    outcome: oneshot::Sender<T>,
}

impl<T> Ticket<T> {
    /// Wait until the bucket admits this ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket was dropped (e.g. evicted) before
    /// admitting the ticket.
    pub async fn admitted(self) -> Result<Admitted<T>, RecvError> {
        self.admitted.await?;

        Ok(Admitted {
            outcome: self.outcome,
        })
    }
}

/// A ticket that has been admitted; the caller now performs its request and
/// reports the outcome.
#[derive(Debug)]
pub struct Admitted<T> {
    outcome: oneshot::Sender<T>,
}

impl<T> Admitted<T> {
    /// Report the outcome of the completed request.
    ///
    /// If the bucket is no longer listening (it was evicted mid-flight) the
    /// outcome is returned to the caller, which may simply drop it.
    pub fn report(self, outcome: T) -> Result<(), T> {
        self.outcome.send(outcome)
    }
}

/// Held by the bucket dispatcher while the ticket sits in its queue.
#[derive(Debug)]
pub struct BucketHandle<T> {
    admit: oneshot::Sender<()>,
    outcome: oneshot::Receiver<T>,
}

impl<T> BucketHandle<T> {
    /// Admit the ticket, notifying the caller it may proceed.
    ///
    /// Returns `Err` if the caller already gave up (dropped its [`Ticket`]).
    pub fn admit(self) -> Result<PendingCompletion<T>, ()> {
        self.admit.send(()).map_err(|_| ())?;

        Ok(PendingCompletion {
            outcome: self.outcome,
        })
    }
}

/// Returned once a bucket handle has admitted its ticket; awaiting this
/// yields the outcome the caller eventually reports.
#[derive(Debug)]
pub struct PendingCompletion<T> {
    outcome: oneshot::Receiver<T>,
}

impl<T> PendingCompletion<T> {
    /// Wait for the caller to report the request's outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the caller was dropped before reporting (e.g. the
    /// request was cancelled after admission).
    pub async fn wait(self) -> Result<T, RecvError> {
        self.outcome.await
    }
}

/// Create a new ticket channel pair.
pub fn channel<T>() -> (Ticket<T>, BucketHandle<T>) {
    let (admit_tx, admit_rx) = oneshot::channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();

    (
        Ticket {
            admitted: admit_rx,
            outcome: outcome_tx,
        },
        BucketHandle {
            admit: admit_tx,
            outcome: outcome_rx,
        },
    )
}
