//! Single `use` that pulls in everything a typical caller needs.
//!
//! ```ignore
//! use wayfarer::prelude::*;
//!
//! let router = create_router(
//!     vec![RouteDef::new("home", "/home")],
//!     RouterOptions::default(),
//!     HashMap::new(),
//! )?;
//! router.start(None).await?;
//! ```

pub use crate::dependencies::DependencyBag;
pub use crate::error::RouterError;
pub use crate::events::{
    CancelSignal, EventBus, EventKind, EventPayload, EventSubscription, Listener, ObserveOptions,
    RouteChange, RouteChangeListener, StateObserver,
};
pub use crate::guards::{GuardFactory, GuardOutcome, GuardRegistry, GuardSource, ResolvedGuard};
pub use crate::lifecycle::{Fsm, LifecycleEvent, LifecycleState};
pub use crate::middleware::{Middleware, MiddlewareFactory, MiddlewareOutcome, MiddlewareRegistry};
pub use crate::options::{RouterOptions, RouterOptionsBuilder, TrailingSlashMode};
pub use crate::params::{ParamValue, Params};
pub use crate::plugin::{PluginFactory, PluginHooks, PluginRegistry};
pub use crate::route_tree::{RouteDef, RoutePatch, RouteTree};
pub use crate::router::{create_router, Router, RouterMetrics};
pub use crate::state::{Meta, State};
pub use crate::transition::{CancelHandle, NavigateOptions, TransitionEngine};
