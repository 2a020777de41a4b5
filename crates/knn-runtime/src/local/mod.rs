//! In-process managed runtime.
//!
//! Hosts readable and writable index streams on a small managed heap so the
//! bridge can be driven without a JVM. Each [`LocalRuntime::attach`] opens a
//! frame: transient references created through that [`LocalEnv`] are only
//! valid inside it and are deleted when it is dropped.
//!
//! The runtime keeps counters (calls per member, live references, pinned
//! buffers) and can raise managed exceptions on demand, which is what the
//! bridge's tests assert against.

mod heap;
mod streams;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use knn_types::RuntimeSettings;
use tracing::debug;

use crate::binding::BindingCache;
use crate::env::Env;
use crate::error::RuntimeError;
use crate::signatures::Member;
use crate::value::{ClassRef, MethodId, ObjRef, ReturnKind, Value};

use heap::{Heap, Object, CLASS_INPUT, CLASS_OUTPUT, CLASS_PLAIN_INPUT};
pub use streams::{SharedBuffer, VectorSupply};

/// Snapshot of the runtime's reference and buffer accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Transient references alive in any open frame
    pub live_local_refs: usize,
    /// Durable references not yet deleted
    pub live_durable_refs: usize,
    /// Element buffers obtained and not yet released
    pub pinned_buffers: usize,
    /// Objects on the heap, including registered streams
    pub objects: usize,
}

/// In-process managed runtime.
pub struct LocalRuntime {
    heap: Mutex<Heap>,
    bindings: BindingCache,
    next_frame: AtomicU64,
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::with_local_capacity(knn_types::config::DEFAULT_LOCAL_REF_CAPACITY)
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::with_local_capacity(settings.local_ref_capacity)
    }

    /// Runtime allowing at most `capacity` live transient references per frame.
    pub fn with_local_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(Heap::new(capacity)),
            bindings: BindingCache::new(),
            next_frame: AtomicU64::new(1),
        }
    }

    fn heap(&self) -> MutexGuard<'_, Heap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a call frame.
    pub fn attach(&self) -> LocalEnv<'_> {
        let frame = self.next_frame.fetch_add(1, Ordering::Relaxed);
        debug!(frame, "Attached to local runtime");
        LocalEnv {
            runtime: self,
            frame,
        }
    }

    pub fn bindings(&self) -> &BindingCache {
        &self.bindings
    }

    /// Register a readable stream with no vector source.
    pub fn register_input(&self, reader: impl Read + Send + 'static) -> ObjRef {
        self.register(
            CLASS_PLAIN_INPUT,
            Object::Input {
                reader: Box::new(reader),
                vectors: None,
            },
        )
    }

    /// Register a readable stream that can also replay `vectors`.
    pub fn register_input_with_vectors(
        &self,
        reader: impl Read + Send + 'static,
        vectors: VectorSupply,
    ) -> ObjRef {
        self.register(
            CLASS_INPUT,
            Object::Input {
                reader: Box::new(reader),
                vectors: Some(Arc::new(vectors)),
            },
        )
    }

    /// Register a writable stream.
    pub fn register_output(&self, writer: impl Write + Send + 'static) -> ObjRef {
        self.register(CLASS_OUTPUT, Object::Output(Box::new(writer)))
    }

    fn register(&self, class: usize, object: Object) -> ObjRef {
        self.heap().alloc_root(class, object)
    }

    /// Drop the host's reference to a registered stream.
    pub fn unregister(&self, stream: ObjRef) {
        self.heap().delete_root(stream);
    }

    /// Raise a managed exception on every call to `member`.
    pub fn fail_on(&self, member: &str, message: &str) {
        self.fail_after(member, 0, message);
    }

    /// Let `successes` calls to `member` through, then raise on every later one.
    pub fn fail_after(&self, member: &str, successes: usize, message: &str) {
        self.heap().fail_after(member, successes, message);
    }

    pub fn clear_failures(&self) {
        self.heap().clear_failures();
    }

    /// Number of calls made to a member, by name.
    pub fn calls(&self, member: &str) -> usize {
        self.heap().calls(member)
    }

    pub fn stats(&self) -> RuntimeStats {
        let heap = self.heap();
        let (live_local_refs, live_durable_refs) = heap.count_refs();
        RuntimeStats {
            live_local_refs,
            live_durable_refs,
            pinned_buffers: heap.pinned(),
            objects: heap.object_count(),
        }
    }
}

/// One attached call into a [`LocalRuntime`].
pub struct LocalEnv<'rt> {
    runtime: &'rt LocalRuntime,
    frame: u64,
}

impl Drop for LocalEnv<'_> {
    fn drop(&mut self) {
        self.runtime.heap().end_frame(self.frame);
        debug!(frame = self.frame, "Detached from local runtime");
    }
}

impl Env for LocalEnv<'_> {
    fn bindings(&self) -> &BindingCache {
        &self.runtime.bindings
    }

    fn class_of(&self, obj: ObjRef) -> Result<ClassRef, RuntimeError> {
        self.runtime.heap().class_of(obj, self.frame)
    }

    fn resolve_method(&self, class: ClassRef, member: &Member) -> Result<MethodId, RuntimeError> {
        self.runtime.heap().resolve_method(class, member)
    }

    fn call_method(
        &self,
        obj: ObjRef,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.runtime
            .heap()
            .call_method(self.frame, obj, method, ret, args)
    }

    fn new_byte_array(&self, len: usize) -> Result<ObjRef, RuntimeError> {
        self.runtime.heap().new_byte_array(self.frame, len)
    }

    fn array_len(&self, array: ObjRef) -> Result<usize, RuntimeError> {
        self.runtime.heap().array_len(array, self.frame)
    }

    fn read_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &mut [u8],
    ) -> Result<(), RuntimeError> {
        self.runtime
            .heap()
            .read_byte_region(array, self.frame, start, buf)
    }

    fn write_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &[u8],
    ) -> Result<(), RuntimeError> {
        self.runtime
            .heap()
            .write_byte_region(array, self.frame, start, buf)
    }

    fn float_elements(&self, array: ObjRef) -> Result<Vec<f32>, RuntimeError> {
        self.runtime.heap().float_elements(array, self.frame)
    }

    fn byte_elements(&self, array: ObjRef) -> Result<Vec<i8>, RuntimeError> {
        self.runtime.heap().byte_elements(array, self.frame)
    }

    fn release_elements(&self, array: ObjRef) {
        self.runtime.heap().release_elements(array, self.frame);
    }

    fn new_durable_ref(&self, obj: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.runtime.heap().new_durable(obj, self.frame)
    }

    fn delete_durable_ref(&self, obj: ObjRef) {
        self.runtime.heap().delete_durable(obj);
    }

    fn delete_local_ref(&self, obj: ObjRef) {
        self.runtime.heap().delete_local(obj);
    }
}
