//! Chat session: the live conversation and the streamed turn in flight
//!
//! A `ChatSession` owns the visible message history, lazily opens one
//! remote session with the collaborator, and persists the history after
//! every change. `submit` returns a `ResponseStream` that appends reply
//! fragments to the open model message as they are polled.

mod chat_session;
mod stream;

pub use chat_session::ChatSession;
pub use stream::ResponseStream;
