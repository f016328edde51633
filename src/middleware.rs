//! Middleware chain (component I): ordered async interceptors invoked
//! inside each transition, after guards and before commit. The source
//! library's `middleware(to, from, done)` callback-style completion signal
//! is replaced with a direct async return — Rust idiom favors an `async fn`
//! returning an outcome over continuation-passing style; the three `done`
//! outcomes (continue / fail / deny-redirect) map onto
//! [`MiddlewareOutcome`]'s three variants one-to-one. Atomic batch
//! registration mirrors [`crate::plugin::PluginRegistry`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RouterError;
use crate::state::State;

const WARN_THRESHOLD: usize = 10;
const ERROR_THRESHOLD: usize = 25;
const HARD_FAIL_THRESHOLD: usize = 50;

#[derive(Debug, Clone)]
pub enum MiddlewareOutcome {
    Continue,
    Fail(RouterError),
    Deny(State),
}

pub type Middleware =
    Arc<dyn Fn(State, Option<State>) -> Pin<Box<dyn Future<Output = MiddlewareOutcome> + Send>> + Send + Sync>;

pub type MiddlewareFactory = Arc<dyn Fn() -> Middleware + Send + Sync>;

struct RegisteredMiddleware {
    middleware: Middleware,
    factory_ptr: *const (),
}

unsafe impl Send for RegisteredMiddleware {}
unsafe impl Sync for RegisteredMiddleware {}

#[derive(Default)]
pub struct MiddlewareRegistry {
    chain: Vec<RegisteredMiddleware>,
}

fn factory_ptr(factory: &MiddlewareFactory) -> *const () {
    Arc::as_ptr(factory) as *const ()
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        MiddlewareRegistry::default()
    }

    pub fn register(&mut self, factories: Vec<MiddlewareFactory>) -> Result<Vec<*const ()>, RouterError> {
        let mut deduped = Vec::new();
        let mut seen = Vec::new();
        for factory in factories {
            let ptr = factory_ptr(&factory);
            if seen.contains(&ptr) {
                tracing::warn!("duplicate middleware factory within the same registration batch; skipping");
                continue;
            }
            if self.chain.iter().any(|m| m.factory_ptr == ptr) {
                return Err(RouterError::invalid(
                    "router.useMiddleware",
                    "middleware factory already registered",
                ));
            }
            seen.push(ptr);
            deduped.push(factory);
        }

        let prospective_total = self.chain.len() + deduped.len();
        if prospective_total > HARD_FAIL_THRESHOLD {
            return Err(RouterError::invalid(
                "router.useMiddleware",
                format!("middleware count would exceed hard limit of {HARD_FAIL_THRESHOLD}"),
            ));
        }
        if prospective_total > ERROR_THRESHOLD {
            tracing::error!(count = prospective_total, "middleware count exceeds recommended limit");
        } else if prospective_total > WARN_THRESHOLD {
            tracing::warn!(count = prospective_total, "middleware count approaching recommended limit");
        }

        let initialized: Vec<RegisteredMiddleware> = deduped
            .iter()
            .map(|factory| RegisteredMiddleware {
                middleware: factory(),
                factory_ptr: factory_ptr(factory),
            })
            .collect();
        let ptrs = initialized.iter().map(|m| m.factory_ptr).collect();
        self.chain.extend(initialized);
        Ok(ptrs)
    }

    pub fn unregister_batch(&mut self, ptrs: &[*const ()]) {
        self.chain.retain(|m| !ptrs.contains(&m.factory_ptr));
    }

    /// Runs the chain sequentially in registration order; the next
    /// middleware only starts after the previous resolves. Stops at the
    /// first non-`Continue` outcome.
    pub async fn run_chain(&self, to: &State, from: Option<&State>) -> MiddlewareOutcome {
        for entry in &self.chain {
            let outcome = (entry.middleware)(to.clone(), from.cloned()).await;
            if !matches!(outcome, MiddlewareOutcome::Continue) {
                return outcome;
            }
        }
        MiddlewareOutcome::Continue
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_state(name: &str) -> State {
        State::new(
            name,
            Default::default(),
            format!("/{name}"),
            crate::state::Meta {
                id: 1,
                params: Default::default(),
                options: Default::default(),
                source: None,
            },
        )
    }

    fn passthrough() -> MiddlewareFactory {
        Arc::new(|| {
            Arc::new(|_to, _from| {
                Box::pin(async { MiddlewareOutcome::Continue })
                    as Pin<Box<dyn Future<Output = MiddlewareOutcome> + Send>>
            })
        })
    }

    #[tokio::test]
    async fn chain_runs_sequentially_and_stops_on_failure() {
        let mut registry = MiddlewareRegistry::new();
        registry.register(vec![passthrough()]).unwrap();
        registry
            .register(vec![Arc::new(|| {
                Arc::new(|_to, _from| {
                    Box::pin(async { MiddlewareOutcome::Fail(RouterError::TransitionErr { cause: None }) })
                        as Pin<Box<dyn Future<Output = MiddlewareOutcome> + Send>>
            })})])
            .unwrap();
        let to = dummy_state("next");
        let outcome = registry.run_chain(&to, None).await;
        assert!(matches!(outcome, MiddlewareOutcome::Fail(_)));
    }

    #[test]
    fn duplicate_factory_across_calls_errors() {
        let mut registry = MiddlewareRegistry::new();
        let factory = passthrough();
        registry.register(vec![factory.clone()]).unwrap();
        let err = registry.register(vec![factory]);
        assert!(err.is_err());
    }
}
