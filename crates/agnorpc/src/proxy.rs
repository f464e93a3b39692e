//! Client-side stand-ins for server objects.
//!
//! A handle received twice resolves to the same [`RemoteHandle`] as long as the
//! first one is still alive, so proxies can be compared by identity like the
//! objects they stand for.

use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;

use agnopack::ObjectRef;
use agnopack::Serializer;

/// A server object, known by its handle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RemoteHandle {
    id: i64,
}

impl RemoteHandle {
    pub fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Default)]
pub struct ProxySerializer {
    cache: DashMap<i64, Weak<RemoteHandle>>,
}

impl ProxySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live proxy for `id`, creating one if none exists.
    pub fn proxy(&self, id: i64) -> Arc<RemoteHandle> {
        let mut entry = self.cache.entry(id).or_default();
        if let Some(handle) = entry.upgrade() {
            return handle;
        }
        let handle = Arc::new(RemoteHandle { id });
        *entry = Arc::downgrade(&handle);
        handle
    }

    pub fn forget(&self, id: i64) {
        self.cache.remove(&id);
    }

    /// Drops cache entries whose proxies are gone.
    pub fn sweep(&self) {
        self.cache.retain(|_, handle| handle.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Serializer for ProxySerializer {
    fn store(&self, obj: Option<&ObjectRef>) -> agnopack::Result<i64> {
        let Some(obj) = obj else { return Ok(-1) };
        obj.downcast::<RemoteHandle>()
            .map(|handle| handle.id)
            .ok_or_else(|| agnopack::Error::Custom("only remote handles can be sent back".to_string()))
    }

    fn load(&self, id: i64) -> agnopack::Result<Option<ObjectRef>> {
        if id == -1 {
            return Ok(None);
        }
        Ok(Some(ObjectRef::from_arc(self.proxy(id))))
    }
}
