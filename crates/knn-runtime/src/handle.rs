//! Cross-boundary handle.

use crate::env::Env;
use crate::value::ObjRef;

/// An execution context paired with the managed stream it was handed.
///
/// Borrowed for `'e`, the duration of the native call; it cannot outlive it.
#[derive(Clone, Copy)]
pub struct Handle<'e> {
    env: &'e dyn Env,
    stream: ObjRef,
}

impl<'e> Handle<'e> {
    pub fn new(env: &'e dyn Env, stream: ObjRef) -> Self {
        Self { env, stream }
    }

    pub fn env(&self) -> &'e dyn Env {
        self.env
    }

    pub fn stream(&self) -> ObjRef {
        self.stream
    }
}

impl std::fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("stream", &self.stream).finish()
    }
}
