//! Per-layer filter that drops repeated log events.
//!
//! Two events are duplicates when they share level, target, message, recorded fields and
//! enclosing span. A duplicate is dropped if the previous copy was emitted less than `window` ago.

use moka::sync::Cache;
use std::{
    collections::hash_map::DefaultHasher,
    fmt::{self, Write as _},
    hash::{Hash, Hasher},
    time::Duration,
};
use tracing::{Event, Metadata, Subscriber, field::Field, field::Visit};
use tracing_subscriber::{
    layer::{Context, Filter},
    registry::LookupSpan,
};

/// Upper bound on distinct events remembered at once.
const MAX_TRACKED_EVENTS: u64 = 10_000;

#[derive(Debug)]
pub(crate) struct DedupCache {
    /// `None` when the window is zero
    seen: Option<Cache<u64, ()>>,
}

impl DedupCache {
    pub(crate) fn new(window: Duration) -> Self {
        let seen = (!window.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_TRACKED_EVENTS)
                .time_to_live(window)
                .build()
        });
        Self { seen }
    }

    /// Whether an event with `key` should be written now.
    ///
    /// Suppressed copies are not recorded; the window runs from the last emitted one.
    pub(crate) fn should_emit(&self, key: u64) -> bool {
        let Some(seen) = &self.seen else {
            return true;
        };
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, ());
        true
    }

    #[cfg(test)]
    fn len(&self) -> u64 {
        self.seen.as_ref().map_or(0, |seen| {
            seen.run_pending_tasks();
            seen.entry_count()
        })
    }
}

#[derive(Debug)]
pub struct DedupFilter {
    cache: DedupCache,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            cache: DedupCache::new(window),
        }
    }
}

/// Renders every field of an event into one string.
#[derive(Default)]
struct FieldCollector(String);

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let _ = write!(self.0, "{}={:?};", field.name(), value);
    }
}

impl<S> Filter<S> for DedupFilter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, cx: &Context<'_, S>) -> bool {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let metadata = event.metadata();
        let mut hasher = DefaultHasher::new();
        metadata.level().hash(&mut hasher);
        metadata.target().hash(&mut hasher);
        fields.0.hash(&mut hasher);
        cx.event_span(event).map(|span| span.id().into_u64()).hash(&mut hasher);

        self.cache.should_emit(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tracing::{info, info_span, warn};
    use tracing_subscriber::{Layer, layer::SubscriberExt};

    #[test]
    fn test_repeat_inside_window_is_dropped() {
        let cache = DedupCache::new(Duration::from_secs(60));

        assert!(cache.should_emit(1));
        assert!(!cache.should_emit(1));
        assert!(cache.should_emit(2));
        assert!(!cache.should_emit(2));
    }

    #[test]
    fn test_repeat_after_window_is_emitted() {
        let cache = DedupCache::new(Duration::from_millis(50));

        assert!(cache.should_emit(1));
        assert!(!cache.should_emit(1));
        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.should_emit(1));
    }

    #[test]
    fn test_zero_window_disables() {
        let cache = DedupCache::new(Duration::ZERO);

        assert!(cache.should_emit(7));
        assert!(cache.should_emit(7));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_distinct_events_stay_bounded() {
        let cache = DedupCache::new(Duration::from_secs(5));
        let keys = MAX_TRACKED_EVENTS * 2;

        for key in 0..keys {
            cache.should_emit(key);
        }

        assert!(cache.len() <= MAX_TRACKED_EVENTS, "tracked {}", cache.len());
    }

    struct CountingLayer(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, _event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_filter_drops_identical_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(CountingLayer(count.clone()).with_filter(DedupFilter::new(Duration::from_secs(60))));

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                info!("Polling for generation result");
            }
            info!(attempt = 2, "Polling for generation result");
            warn!("Polling for generation result");
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_filter_keeps_events_from_different_spans() {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(CountingLayer(count.clone()).with_filter(DedupFilter::new(Duration::from_secs(60))));

        tracing::subscriber::with_default(subscriber, || {
            // Both spans stay open so the registry cannot reuse an id
            let first = info_span!("pipeline", request = 1);
            let second = info_span!("pipeline", request = 2);
            for span in [&first, &second] {
                let _guard = span.enter();
                info!("Received response from vendor");
                info!("Received response from vendor");
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
