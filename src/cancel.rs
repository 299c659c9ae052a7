// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot cancellation signal.
//!
//! Every potentially long-running operation of this crate takes a [`Signal`]
//! and returns [`Error::Cancelled`](crate::Error::Cancelled) once it fires.
//! A signal terminates exactly once; whichever condition is reached first
//! (manual cancel, timeout, deadline or a cancelled parent) wins and any
//! further cancellation is a no-op.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A cloneable one-shot cancellation handle.
///
/// Clones share the same underlying state: cancelling one cancels all.
///
/// ```no_run
/// use std::time::Duration;
/// use tokio_sunspec::cancel::Signal;
///
/// # async fn demo() {
/// let ctx = Signal::new().timeout(Duration::from_secs(5));
/// // pass `&ctx` into scan/read/write; drop or cancel to abort
/// ctx.cancel();
/// ctx.cancelled().await; // resolves immediately
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
}

impl Signal {
    /// Creates a fresh, uncancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminates the signal.
    ///
    /// Cancelling an already cancelled signal is safe.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the signal has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal is cancelled.
    ///
    /// Awaiting after cancellation resolves immediately.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Cancels the signal after the given duration has elapsed.
    ///
    /// Other cancellation conditions still apply; the first one wins.
    #[must_use]
    pub fn timeout(self, after: Duration) -> Self {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(after) => token.cancel(),
                () = token.cancelled() => {}
            }
        });
        self
    }

    /// Cancels the signal once the given instant is reached.
    ///
    /// Other cancellation conditions still apply; the first one wins.
    #[must_use]
    pub fn deadline(self, at: Instant) -> Self {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep_until(at) => token.cancel(),
                () = token.cancelled() => {}
            }
        });
        self
    }

    /// Escalates a cancellation of `parent` to this signal.
    ///
    /// Other cancellation conditions still apply; the first one wins.
    /// Cancelling the child never affects the parent.
    #[must_use]
    pub fn propagate(self, parent: &Signal) -> Self {
        let parent = parent.token.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => token.cancel(),
                () = token.cancelled() => {}
            }
        });
        self
    }
}
