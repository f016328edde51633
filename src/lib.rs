pub mod codec;
pub mod config_store;
pub mod dependencies;
pub mod error;
pub mod events;
pub mod guards;
pub mod lifecycle;
pub mod middleware;
pub mod options;
pub mod params;
pub mod plugin;
pub mod prelude;
pub mod route_tree;
pub mod router;
pub mod state;
pub mod transition;

pub use dependencies::DependencyBag;
pub use error::RouterError;
pub use events::{
    CancelSignal, EventBus, EventKind, EventPayload, EventSubscription, Listener, ObserveOptions,
    RouteChange, RouteChangeListener, StateObserver,
};
pub use guards::{GuardFactory, GuardOutcome, GuardRegistry, GuardSource, ResolvedGuard};
pub use lifecycle::{Fsm, LifecycleEvent, LifecycleState};
pub use middleware::{Middleware, MiddlewareFactory, MiddlewareOutcome, MiddlewareRegistry};
pub use options::{
    ArrayFormat, BooleanFormat, NullFormat, QueryParamsMode, QueryParamsOptions,
    RouterOptions, RouterOptionsBuilder, TrailingSlashMode, UrlParamsEncoding,
};
pub use params::{ParamValue, Params};
pub use plugin::{PluginFactory, PluginHooks, PluginRegistry};
pub use route_tree::{RouteDef, RoutePatch, RouteTree};
pub use router::{create_router, Router, RouterMetrics};
pub use state::{Meta, NavigationOptionsSnapshot, State};
pub use transition::{CancelHandle, NavigateOptions, TransitionCounts, TransitionEngine};
