use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::chat_session::Shared;
use crate::SessionError;
use crate::collaborator::TextStream;
use crate::storage::KeyValueStore;

/// Reply fragments of one submission
///
/// Each fragment is appended to the session's open model message (and
/// persisted) before it is yielded. The stream ends early, without an
/// error, once the submission is cancelled, reset or cleared. Dropping an
/// unfinished stream cancels the submission.
pub struct ResponseStream<S: KeyValueStore> {
    shared: Arc<Shared<S>>,
    id: u64,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    fragments: TextStream,
    finished: bool,
}

impl<S: KeyValueStore> ResponseStream<S> {
    pub(crate) fn new(
        shared: Arc<Shared<S>>,
        id: u64,
        token: CancellationToken,
        fragments: TextStream,
    ) -> Self {
        Self {
            shared,
            id,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            fragments,
            finished: false,
        }
    }

    /// Token that cancels this submission, e.g. from a Ctrl-C handler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn finish(&mut self) -> Poll<Option<Result<String, SessionError>>> {
        self.finished = true;
        Poll::Ready(None)
    }
}

impl<S: KeyValueStore> Stream for ResponseStream<S> {
    type Item = Result<String, SessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.shared.abandon(this.id);
            return this.finish();
        }

        loop {
            match this.fragments.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if !this.shared.append(this.id, &fragment) {
                        return this.finish();
                    }
                    return Poll::Ready(Some(Ok(fragment)));
                }
                Poll::Ready(Some(Err(e))) => {
                    let rolled_back = this.shared.fail(this.id);
                    this.finished = true;
                    return if rolled_back {
                        Poll::Ready(Some(Err(SessionError::Collaborator(e))))
                    } else {
                        Poll::Ready(None)
                    };
                }
                Poll::Ready(None) => {
                    this.shared.complete(this.id);
                    return this.finish();
                }
            }
        }
    }
}

impl<S: KeyValueStore> Drop for ResponseStream<S> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.abandon(self.id);
        }
    }
}
