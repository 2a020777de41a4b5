//! Method binding cache.
//!
//! Bindings are keyed by (durable class identity, member name, signature)
//! and resolved at most once per key. Lookups after the first resolution are
//! lock-free reads on a shard; concurrent first lookups for the same key
//! serialize on the shard's entry lock, so the runtime sees one resolution.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::env::Env;
use crate::error::RuntimeError;
use crate::signatures::Member;
use crate::value::{ClassRef, MethodId};

/// Cache key for a resolved binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub class: ClassRef,
    pub name: &'static str,
    pub signature: &'static str,
}

impl BindingKey {
    pub fn new(class: ClassRef, member: &Member) -> Self {
        Self {
            class,
            name: member.name,
            signature: member.signature,
        }
    }
}

/// Resolved method bindings.
#[derive(Debug, Default)]
pub struct BindingCache {
    methods: DashMap<BindingKey, MethodId>,
    resolutions: AtomicUsize,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached binding for `member` on `class`, resolving it
    /// through `env` on first use. Failed resolutions are not cached.
    pub fn resolve<E: Env + ?Sized>(
        &self,
        env: &E,
        class: ClassRef,
        member: &Member,
    ) -> Result<MethodId, RuntimeError> {
        let key = BindingKey::new(class, member);
        if let Some(method) = self.methods.get(&key) {
            return Ok(*method);
        }

        match self.methods.entry(key) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let method = env.resolve_method(class, member)?;
                self.resolutions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    class = class.as_raw(),
                    name = member.name,
                    signature = member.signature,
                    "Resolved method binding"
                );
                entry.insert(method);
                Ok(method)
            }
        }
    }

    /// Cached binding, if already resolved.
    pub fn get(&self, class: ClassRef, member: &Member) -> Option<MethodId> {
        self.methods
            .get(&BindingKey::new(class, member))
            .map(|method| *method)
    }

    /// Number of successful resolutions performed so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalRuntime, SharedBuffer};
    use crate::signatures::{STREAM_FLUSH, STREAM_WRITE};
    use crate::ObjRef;

    fn output(runtime: &LocalRuntime) -> ObjRef {
        runtime.register_output(SharedBuffer::new())
    }

    #[test]
    fn test_resolves_once_per_key() {
        let runtime = LocalRuntime::new();
        let stream = output(&runtime);
        let env = runtime.attach();

        let first = env.method(stream, &STREAM_WRITE).unwrap();
        let second = env.method(stream, &STREAM_WRITE).unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.bindings().resolutions(), 1);

        env.method(stream, &STREAM_FLUSH).unwrap();
        assert_eq!(runtime.bindings().resolutions(), 2);
        assert_eq!(runtime.bindings().len(), 2);
    }

    #[test]
    fn test_cache_survives_calls() {
        let runtime = LocalRuntime::new();
        let stream = output(&runtime);
        {
            let env = runtime.attach();
            env.method(stream, &STREAM_WRITE).unwrap();
        }
        let env = runtime.attach();
        let class = env.class_of(stream).unwrap();
        assert!(runtime.bindings().get(class, &STREAM_WRITE).is_some());
        env.method(stream, &STREAM_WRITE).unwrap();
        assert_eq!(runtime.bindings().resolutions(), 1);
    }

    #[test]
    fn test_missing_member_not_cached() {
        let runtime = LocalRuntime::new();
        let stream = output(&runtime);
        let env = runtime.attach();
        let missing = Member::new("seek", "(J)V");

        assert!(matches!(
            env.method(stream, &missing),
            Err(RuntimeError::MethodNotFound { .. })
        ));
        assert!(runtime.bindings().is_empty());
        assert_eq!(runtime.bindings().resolutions(), 0);
    }

    #[test]
    fn test_concurrent_resolution() {
        let runtime = LocalRuntime::new();
        let stream = output(&runtime);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let env = runtime.attach();
                    env.method(stream, &STREAM_WRITE).unwrap();
                });
            }
        });

        assert_eq!(runtime.bindings().resolutions(), 1);
    }
}
