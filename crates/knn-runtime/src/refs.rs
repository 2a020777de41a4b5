//! Scoped ownership of cross-boundary references and element buffers.
//!
//! Each guard releases what it holds exactly once, when dropped, on every
//! exit path of the code that acquired it.

use std::ops::Deref;

use tracing::trace;

use crate::env::Env;
use crate::error::RuntimeError;
use crate::value::ObjRef;

/// Transient reference, deleted when the guard drops.
pub struct LocalRef<'e> {
    env: &'e dyn Env,
    obj: ObjRef,
}

impl<'e> LocalRef<'e> {
    /// Take ownership of a transient reference returned by `env`.
    pub fn new(env: &'e dyn Env, obj: ObjRef) -> Self {
        Self { env, obj }
    }

    pub fn get(&self) -> ObjRef {
        self.obj
    }

    /// Promote to a durable reference. The transient one is still deleted
    /// when this guard drops.
    pub fn promote(&self) -> Result<DurableRef<'e>, RuntimeError> {
        let durable = self.env.new_durable_ref(self.obj)?;
        Ok(DurableRef {
            env: self.env,
            obj: durable,
        })
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        self.env.delete_local_ref(self.obj);
    }
}

/// Durable reference, deleted exactly once when the guard drops.
pub struct DurableRef<'e> {
    env: &'e dyn Env,
    obj: ObjRef,
}

impl DurableRef<'_> {
    pub fn get(&self) -> ObjRef {
        self.obj
    }
}

impl Drop for DurableRef<'_> {
    fn drop(&mut self) {
        trace!(obj = %self.obj, "Releasing durable reference");
        self.env.delete_durable_ref(self.obj);
    }
}

/// Elements of a managed primitive array, released when the guard drops.
pub struct Elements<'e, T> {
    env: &'e dyn Env,
    array: ObjRef,
    values: Vec<T>,
}

impl<'e> Elements<'e, f32> {
    pub fn floats(env: &'e dyn Env, array: ObjRef) -> Result<Self, RuntimeError> {
        let values = env.float_elements(array)?;
        Ok(Self { env, array, values })
    }
}

impl<'e> Elements<'e, i8> {
    pub fn bytes(env: &'e dyn Env, array: ObjRef) -> Result<Self, RuntimeError> {
        let values = env.byte_elements(array)?;
        Ok(Self { env, array, values })
    }
}

impl<T> Deref for Elements<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.values
    }
}

impl<T> Drop for Elements<'_, T> {
    fn drop(&mut self) {
        self.env.release_elements(self.array);
    }
}
