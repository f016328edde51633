use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use wayfarer::prelude::*;
use wayfarer::{GuardOutcome, NavigationOptionsSnapshot};

fn empty_params() -> Params {
    Params::new()
}

#[tokio::test]
async fn scenario_1_forward_chain_resolves_to_terminal() {
    let router = create_router(
        vec![
            RouteDef::new("a", "/a").with_forward_to("b"),
            RouteDef::new("b", "/b").with_forward_to("c"),
            RouteDef::new("c", "/c"),
        ],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();

    let state = router.start(Some(("a", empty_params()))).await.unwrap();
    assert_eq!(state.name(), "c");
    assert_eq!(router.get_state().unwrap().name(), "c");
}

#[tokio::test]
async fn scenario_2_cycle_rejection_leaves_tree_unchanged() {
    let result = create_router(
        vec![
            RouteDef::new("a", "/a").with_forward_to("b"),
            RouteDef::new("b", "/b").with_forward_to("a"),
        ],
        RouterOptions::default(),
        HashMap::new(),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn scenario_3_supersession_emits_cancel_then_success_for_the_newer_navigation() {
    let gate = Arc::new(Notify::new());
    let gate_for_guard = gate.clone();

    let slow_guard: GuardFactory = Arc::new(move |_deps| {
        let gate = gate_for_guard.clone();
        Arc::new(move |_to, _from| {
            let gate = gate.clone();
            Box::pin(async move {
                gate.notified().await;
                GuardOutcome::Allow
            }) as Pin<Box<dyn Future<Output = GuardOutcome> + Send>>
        })
    });

    let router = create_router(
        vec![
            RouteDef::new("home", "/home"),
            RouteDef::new("slow", "/slow"),
            RouteDef::new("fast", "/fast"),
        ],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();
    router.lifecycle().add_activate_guard("slow", slow_guard).unwrap();
    router.start(Some(("home", empty_params()))).await.unwrap();

    let (_cancel_slow, join_slow) = router.navigate("slow", empty_params(), NavigateOptions::default());
    // Give the slow navigation a chance to reach its guard and register TRANSITION_START.
    tokio::task::yield_now().await;

    let (_cancel_fast, join_fast) = router.navigate("fast", empty_params(), NavigateOptions::default());
    let fast_outcome = join_fast.await.unwrap();
    assert_eq!(fast_outcome.unwrap().name(), "fast");
    assert_eq!(router.get_state().unwrap().name(), "fast");

    gate.notify_one();
    let slow_outcome = join_slow.await.unwrap();
    assert!(slow_outcome.is_err());
    assert_eq!(slow_outcome.unwrap_err().code(), "TRANSITION_CANCELLED");
    assert_eq!(router.get_state().unwrap().name(), "fast");
}

fn always_deny() -> GuardFactory {
    Arc::new(|_deps| {
        Arc::new(|_to, _from| {
            Box::pin(async { GuardOutcome::Deny }) as Pin<Box<dyn Future<Output = GuardOutcome> + Send>>
        })
    })
}

#[tokio::test]
async fn scenario_4_replace_preserves_external_deactivate_guard() {
    let router = create_router(
        vec![RouteDef::new("home", "/home"), RouteDef::new("sticky", "/sticky")],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();
    router.lifecycle().add_deactivate_guard("sticky", always_deny()).unwrap();
    router.start(Some(("home", empty_params()))).await.unwrap();
    router.navigate("sticky", empty_params(), NavigateOptions::default()).1.await.unwrap().unwrap();

    router
        .routes()
        .replace(vec![RouteDef::new("home", "/home"), RouteDef::new("sticky", "/sticky")])
        .unwrap();

    let err = router
        .navigate("home", empty_params(), NavigateOptions::default())
        .1
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), "CANNOT_DEACTIVATE");
    assert_eq!(router.get_state().unwrap().name(), "sticky");
}

#[tokio::test]
async fn scenario_5_activation_guard_attempted_redirect() {
    let redirect_guard: GuardFactory = Arc::new(|_deps| {
        Arc::new(|_to, _from| {
            Box::pin(async {
                let redirect = State::new(
                    "sign-in",
                    Params::new(),
                    "/sign-in",
                    Meta {
                        id: 0,
                        params: Params::new(),
                        options: NavigationOptionsSnapshot::default(),
                        source: None,
                    },
                );
                GuardOutcome::AttemptedRedirect(redirect)
            }) as Pin<Box<dyn Future<Output = GuardOutcome> + Send>>
        })
    });

    let router = create_router(
        vec![
            RouteDef::new("home", "/home"),
            RouteDef::new("profile", "/profile"),
            RouteDef::new("sign-in", "/sign-in"),
        ],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();
    router.lifecycle().add_activate_guard("profile", redirect_guard).unwrap();
    router.start(Some(("home", empty_params()))).await.unwrap();

    let err = router
        .navigate("profile", empty_params(), NavigateOptions::default())
        .1
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), "CANNOT_ACTIVATE");
    match err {
        RouterError::CannotActivate { attempted_redirect: Some(redirect), .. } => {
            assert_eq!(redirect.name(), "sign-in");
        }
        other => panic!("expected CannotActivate with attempted_redirect, got {other:?}"),
    }
    assert_eq!(router.get_state().unwrap().name(), "home");
}

#[tokio::test]
async fn scenario_6_skip_transition_is_pure() {
    let router = create_router(
        vec![RouteDef::new("home", "/home"), RouteDef::new("users", "/users").with_children(vec![RouteDef::new("view", "/users/:id")])],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();
    router.start(Some(("home", empty_params()))).await.unwrap();

    let seen_events = Arc::new(AtomicUsize::new(0));
    let seen_events2 = seen_events.clone();
    let _sub = router
        .plugin()
        .add_event_listener(EventKind::TransitionStart, Arc::new(move |_| {
            seen_events2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    let mut params = Params::new();
    params.insert("id".into(), "5".into());
    let preview = router.plugin().build_navigation_state("users.view", params).unwrap();

    assert_eq!(preview.name(), "users.view");
    assert_eq!(preview.path(), "/users/5");
    assert_eq!(seen_events.load(Ordering::SeqCst), 0);
    assert_eq!(router.get_state().unwrap().name(), "home");
}

#[tokio::test]
async fn invariant_route_removed_clears_config_and_forward_targets() {
    let router = create_router(
        vec![RouteDef::new("a", "/a").with_forward_to("b"), RouteDef::new("b", "/b")],
        RouterOptions::default(),
        HashMap::new(),
    )
    .unwrap();
    router.routes().remove("b").unwrap();
    assert!(!router.routes().has("b"));
    assert!(router.routes().get_config("b").is_none());
}

#[tokio::test]
async fn invariant_dispose_rejects_further_mutation() {
    let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
    router.dispose().unwrap();
    let err = router.routes().add(vec![RouteDef::new("other", "/other")], None).unwrap_err();
    assert_eq!(err.code(), "ROUTER_DISPOSED");
}

#[tokio::test]
async fn invariant_plugin_batch_is_atomic_on_duplicate() {
    let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
    let factory: PluginFactory = Arc::new(PluginHooks::default);
    router.plugin().use_plugin(vec![factory.clone()]).unwrap();
    let before = router.metrics().plugin_count;
    let err = router.plugin().use_plugin(vec![factory]);
    assert!(err.is_err());
    assert_eq!(router.metrics().plugin_count, before);
}
