#![forbid(unsafe_code)]

//! LRU + TTL cache of signing certificates.
//!
//! Loading a certificate (opening a token, decrypting a PKCS#12 file) is
//! expensive, so loaded providers are kept for reuse. The cache hands out
//! [`Arc`] handles. An evicted provider stays usable by whoever still holds
//! a handle and is closed exactly once, when its last handle is dropped.

use crate::certificate::CertificateInfo;
use crate::provider::CertificateProvider;
use fiscalsig_core::{Error, HashAlgorithm};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type EvictionCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A cached provider. Closing is owned by the cache: [`close`](CertificateProvider::close)
/// on a handle is a no-op and the wrapped provider is closed on drop.
pub struct CachedProvider {
    key: String,
    inner: Box<dyn CertificateProvider>,
}

impl std::fmt::Debug for CachedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedProvider").field("key", &self.key).finish_non_exhaustive()
    }
}

impl CachedProvider {
    pub fn cache_key(&self) -> &str {
        &self.key
    }
}

impl CertificateProvider for CachedProvider {
    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, Error> {
        self.inner.sign(data, hash)
    }

    fn public_certificate(&self) -> Result<Arc<CertificateInfo>, Error> {
        self.inner.public_certificate()
    }

    fn certificate_chain(&self) -> Result<Vec<Arc<CertificateInfo>>, Error> {
        self.inner.certificate_chain()
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for CachedProvider {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            log::warn!("closing cached certificate {} failed: {e}", self.key);
        }
    }
}

struct Entry {
    handle: Arc<CachedProvider>,
    loaded_at: Instant,
}

/// Cache of certificate providers keyed by caller-chosen names (file path,
/// token slot, taxpayer id).
pub struct CertificateCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    on_evict: Option<EvictionCallback>,
}

impl CertificateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            on_evict: None,
        }
    }

    /// Called with the cache key whenever an entry leaves the cache.
    pub fn on_evict(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(callback));
        self
    }

    /// Return the cached provider for `key`, loading it with `load` when
    /// absent or older than the TTL. `load` runs without the cache lock held.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<CachedProvider>, Error>
    where
        F: FnOnce() -> Result<Box<dyn CertificateProvider>, Error>,
    {
        let mut evicted = Vec::new();
        {
            let mut entries = self.lock()?;
            let cached = entries.get(key).map(|entry| {
                let fresh = entry.loaded_at.elapsed() < self.ttl && !entry.handle.is_closed();
                (fresh, Arc::clone(&entry.handle))
            });
            match cached {
                Some((true, handle)) => {
                    log::trace!("certificate cache hit: {key}");
                    return Ok(handle);
                }
                Some((false, _)) => evicted.extend(entries.pop_entry(key)),
                None => {}
            }
        }
        self.release(evicted);

        log::debug!("loading certificate {key}");
        let handle = Arc::new(CachedProvider {
            key: key.to_owned(),
            inner: load()?,
        });

        let mut evicted = Vec::new();
        {
            let mut entries = self.lock()?;
            let entry = Entry {
                handle: Arc::clone(&handle),
                loaded_at: Instant::now(),
            };
            evicted.extend(entries.push(key.to_owned(), entry));
        }
        self.release(evicted);
        Ok(handle)
    }

    /// Drop `key` from the cache.
    pub fn remove(&self, key: &str) -> Result<(), Error> {
        let evicted: Vec<_> = self.lock()?.pop_entry(key).into_iter().collect();
        self.release(evicted);
        Ok(())
    }

    /// Drop entries older than the TTL.
    pub fn purge_expired(&self) -> Result<usize, Error> {
        let evicted: Vec<_> = {
            let mut entries = self.lock()?;
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.loaded_at.elapsed() >= self.ttl)
                .map(|(k, _)| k.clone())
                .collect();
            expired.iter().filter_map(|k| entries.pop_entry(k)).collect()
        };
        let count = evicted.len();
        self.release(evicted);
        Ok(count)
    }

    pub fn clear(&self) -> Result<(), Error> {
        let evicted: Vec<_> = {
            let mut entries = self.lock()?;
            let mut all = Vec::with_capacity(entries.len());
            while let Some(entry) = entries.pop_lru() {
                all.push(entry);
            }
            all
        };
        self.release(evicted);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Entry>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::Certificate("certificate cache lock poisoned".into()))
    }

    /// Notify and drop evicted entries outside the lock.
    fn release(&self, evicted: Vec<(String, Entry)>) {
        for (key, entry) in evicted {
            log::debug!("evicting certificate {key}");
            if let Some(callback) = &self.on_evict {
                callback(&key);
            }
            drop(entry);
        }
    }
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
