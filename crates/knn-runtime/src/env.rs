//! Execution context trait.
//!
//! An [`Env`] is valid for one call into the native layer. Every transient
//! reference it hands out belongs to that call; only references promoted with
//! [`Env::new_durable_ref`] may be kept across callbacks, and those must be
//! deleted again through the same runtime.

use crate::binding::BindingCache;
use crate::error::RuntimeError;
use crate::signatures::Member;
use crate::value::{ClassRef, MethodId, ObjRef, ReturnKind, Value};

/// One call's view of the managed runtime.
pub trait Env {
    /// Method binding cache shared by every call into this runtime.
    fn bindings(&self) -> &BindingCache;

    /// Durable class identity of an object.
    fn class_of(&self, obj: ObjRef) -> Result<ClassRef, RuntimeError>;

    /// Look up a method on a class. Callers go through [`Env::method`] so the
    /// lookup is cached.
    fn resolve_method(&self, class: ClassRef, member: &Member) -> Result<MethodId, RuntimeError>;

    /// Invoke a resolved method. A managed exception surfaces as
    /// [`RuntimeError::Exception`] and is cleared before returning.
    fn call_method(
        &self,
        obj: ObjRef,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Result<Value, RuntimeError>;

    /// Allocate a managed byte array, returned as a transient reference.
    fn new_byte_array(&self, len: usize) -> Result<ObjRef, RuntimeError>;

    /// Length of a managed array.
    fn array_len(&self, array: ObjRef) -> Result<usize, RuntimeError>;

    /// Copy `buf.len()` bytes out of a managed byte array starting at `start`.
    fn read_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &mut [u8],
    ) -> Result<(), RuntimeError>;

    /// Copy `buf` into a managed byte array starting at `start`.
    fn write_byte_region(
        &self,
        array: ObjRef,
        start: usize,
        buf: &[u8],
    ) -> Result<(), RuntimeError>;

    /// Obtain the elements of a float array. Pair with [`Env::release_elements`].
    fn float_elements(&self, array: ObjRef) -> Result<Vec<f32>, RuntimeError>;

    /// Obtain the elements of a byte array. Pair with [`Env::release_elements`].
    fn byte_elements(&self, array: ObjRef) -> Result<Vec<i8>, RuntimeError>;

    /// Release elements obtained from `float_elements`/`byte_elements`,
    /// discarding any changes.
    fn release_elements(&self, array: ObjRef);

    /// Promote a reference so it outlives the current call.
    fn new_durable_ref(&self, obj: ObjRef) -> Result<ObjRef, RuntimeError>;

    fn delete_durable_ref(&self, obj: ObjRef);

    fn delete_local_ref(&self, obj: ObjRef);

    /// Resolve `member` on the class of `obj`, through the binding cache.
    fn method(&self, obj: ObjRef, member: &Member) -> Result<MethodId, RuntimeError> {
        let class = self.class_of(obj)?;
        self.bindings().resolve(self, class, member)
    }
}
