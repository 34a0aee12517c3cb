use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::error::ProviderResult;

type Loader<T> = Box<dyn Fn() -> ProviderResult<Arc<T>> + Send + Sync>;

/// A capability slot loaded on first use rather than at construction (spec
/// §4.6 "Providers are loaded lazily on first use; failure to load is
/// surfaced as `ProviderUnavailable`... no crash at construction"). A
/// failed load is not cached: the next call retries, since the failure may
/// be transient (missing API key fixed at runtime, model file mounted
/// late).
pub struct LazySlot<T: ?Sized> {
    capability: String,
    loader: Option<Loader<T>>,
    loaded: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> LazySlot<T> {
    #[must_use]
    pub fn empty(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            loader: None,
            loaded: Mutex::new(None),
        }
    }

    pub fn with_loader(
        capability: impl Into<String>,
        loader: impl Fn() -> ProviderResult<Arc<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            capability: capability.into(),
            loader: Some(Box::new(loader)),
            loaded: Mutex::new(None),
        }
    }

    pub fn with_instance(capability: impl Into<String>, instance: Arc<T>) -> Self {
        Self {
            capability: capability.into(),
            loader: None,
            loaded: Mutex::new(Some(instance)),
        }
    }

    pub async fn get(&self) -> ProviderResult<Arc<T>> {
        let mut slot = self.loaded.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let Some(loader) = self.loader.as_ref() else {
            return Err(ProviderError::Unavailable(self.capability.clone()));
        };
        let instance = loader()?;
        *slot = Some(instance.clone());
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    struct Dummy(u32);

    #[tokio::test]
    async fn empty_slot_reports_unavailable() {
        let slot: LazySlot<Dummy> = LazySlot::empty("embed");
        let result = slot.get().await;
        assert!(matches!(result, Err(ProviderError::Unavailable(cap)) if cap == "embed"));
    }

    #[tokio::test]
    async fn loader_runs_once_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let slot = LazySlot::with_loader("embed", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Dummy(7)))
        });

        let first = slot.get().await.expect("load");
        let second = slot.get().await.expect("cached");
        assert_eq!(first.0, 7);
        assert_eq!(second.0, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_retried_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let slot: LazySlot<Dummy> = LazySlot::with_loader("embed", move || {
            let attempt = calls_clone.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(ProviderError::Transient("cold start".into()))
            } else {
                Ok(Arc::new(Dummy(1)))
            }
        });

        assert!(slot.get().await.is_err());
        assert!(slot.get().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
