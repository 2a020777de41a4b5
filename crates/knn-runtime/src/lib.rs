//! # knn-runtime
//!
//! The execution-environment boundary between a native vector engine and a
//! managed runtime that owns the index's storage streams.
//!
//! - [`Env`]: one call's execution context (object calls, arrays, references)
//! - [`Handle`]: an `Env` paired with the stream object it was handed
//! - [`LocalRef`], [`DurableRef`], [`Elements`]: scoped ownership of
//!   transient references, durable references and element buffers
//! - [`BindingCache`]: resolved method bindings keyed by durable class identity
//! - [`LocalRuntime`]: an in-process managed heap used by tools and tests
//! - `jvm` (feature `jni`): a JVM-backed `Env`

pub mod binding;
pub mod env;
pub mod error;
pub mod handle;
#[cfg(feature = "jni")]
pub mod jvm;
pub mod local;
pub mod refs;
pub mod signatures;
pub mod value;

pub use binding::{BindingCache, BindingKey};
pub use env::Env;
pub use error::RuntimeError;
pub use handle::Handle;
pub use local::{LocalEnv, LocalRuntime, RuntimeStats, SharedBuffer, VectorSupply};
pub use refs::{DurableRef, Elements, LocalRef};
pub use signatures::Member;
pub use value::{ClassRef, MethodId, ObjRef, ReturnKind, Value};
