use std::cell::Cell;
use std::rc::Rc;

use super::*;
use crate::boundary::BoundaryProps;
use crate::registry::Outcome;
use crate::tree::Position;

const EXPIRATION: Time = Time(5_000);

struct Fixture {
    tree: Tree,
    registry: DependencyRegistry,
    defaults: BoundaryConfig,
}

impl Fixture {
    fn new() -> Self {
        Self {
            tree: Tree::new(),
            registry: DependencyRegistry::new(),
            defaults: BoundaryConfig::default(),
        }
    }

    fn token(&mut self) -> Token {
        self.registry.mint_mut().mint()
    }

    fn waiting(&mut self, at: impl Into<Position>, name: &str, token: Token) -> NodeId {
        self.tree
            .element(at, name, move |_| RenderOutcome::Suspended(token))
            .unwrap()
    }

    fn run(&mut self, root: NodeId, priority: Priority, memo: Memo) -> PassResult {
        self.run_with(root, priority, memo, None, Time(10))
    }

    fn run_with(
        &mut self,
        root: NodeId,
        priority: Priority,
        memo: Memo,
        prior: Option<&FxHashMap<NodeId, OutputNode>>,
        now: Time,
    ) -> PassResult {
        let mut pass = Pass::new(TaskId(1), root, priority, EXPIRATION, memo);
        let mut input = PassInput {
            tree: &self.tree,
            registry: &mut self.registry,
            prior,
            defaults: &self.defaults,
            now,
        };
        while !pass.step(&mut input) {}
        pass.finish()
    }
}

fn texts(result: &PassResult) -> Vec<&str> {
    result
        .output
        .as_ref()
        .map(OutputNode::visible_texts)
        .unwrap_or_default()
}

#[test]
fn test_siblings_render_past_uncaptured_hole() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let token = fx.token();
    let a = fx.waiting(root, "A", token);
    fx.tree.text(root, "B", "B").unwrap();

    let result = fx.run(root, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["B"]);
    assert_eq!(
        result.suspensions,
        vec![Suspension {
            node: a,
            token,
            region: Region::Node(a),
        }]
    );
    assert!(result.pending.is_empty());
    assert!(!result.sync_committable());
}

#[test]
fn test_boundary_captures_and_shows_fallback() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let feed = fx
        .tree
        .suspense(root, "feed", BoundaryProps::default())
        .unwrap();
    let token = fx.token();
    fx.waiting(feed, "post", token);
    fx.tree
        .element(Position::Fallback(feed), "spinner", |ctx| {
            assert!(ctx.is_loading());
            RenderOutcome::ready("Loading...")
        })
        .unwrap();
    fx.tree.text(root, "footer", "bye").unwrap();

    let result = fx.run(root, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["Loading...", "bye"]);
    assert_eq!(result.suspensions[0].region, Region::Boundary(feed));
    assert_eq!(result.updates.len(), 1);
    assert_eq!(result.updates[0].next, BoundaryMode::ShowingFallback);
    assert!(result.sync_committable());
    assert!(!result.forced);
}

#[test]
fn test_inner_boundary_captures_when_outer_is_clean() {
    let mut fx = Fixture::new();
    let outer = fx
        .tree
        .suspense(Position::Root, "outer", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(outer), "f1", "outer...").unwrap();
    fx.tree.text(outer, "title", "Title").unwrap();
    let inner = fx
        .tree
        .suspense(outer, "inner", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(inner), "f2", "inner...").unwrap();
    let token = fx.token();
    fx.waiting(inner, "body", token);

    let result = fx.run(outer, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["Title", "inner..."]);
    assert_eq!(result.suspensions[0].region, Region::Boundary(inner));
}

#[test]
fn test_outer_capture_voids_inner_decisions() {
    let mut fx = Fixture::new();
    let outer = fx
        .tree
        .suspense(Position::Root, "outer", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(outer), "f1", "outer...").unwrap();
    let inner = fx
        .tree
        .suspense(outer, "inner", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(inner), "f2", "inner...").unwrap();
    let first = fx.token();
    let second = fx.token();
    fx.waiting(inner, "body", first);
    fx.waiting(outer, "aside", second);

    let result = fx.run(outer, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["outer..."]);
    assert!(
        result
            .suspensions
            .iter()
            .all(|s| s.region == Region::Boundary(outer))
    );
    assert_eq!(result.updates.len(), 1);
    assert_eq!(result.updates[0].node, outer);
}

#[test]
fn test_later_suspension_joins_captured_outer_boundary() {
    let mut fx = Fixture::new();
    let outer = fx
        .tree
        .suspense(Position::Root, "outer", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(outer), "f1", "outer...").unwrap();
    let first = fx.token();
    fx.waiting(outer, "aside", first);
    let inner = fx
        .tree
        .suspense(outer, "inner", BoundaryProps::default())
        .unwrap();
    fx.tree.text(Position::Fallback(inner), "f2", "inner...").unwrap();
    let second = fx.token();
    fx.waiting(inner, "body", second);

    let result = fx.run(outer, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["outer..."]);
    assert_eq!(result.suspensions[1].region, Region::Boundary(outer));
    assert_eq!(result.updates.len(), 1);
}

#[test]
fn test_suspended_fallback_keeps_boundary_pending() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let feed = fx
        .tree
        .suspense(root, "feed", BoundaryProps::default())
        .unwrap();
    let primary = fx.token();
    let fallback = fx.token();
    fx.waiting(feed, "post", primary);
    fx.waiting(Position::Fallback(feed), "skeleton", fallback);
    fx.tree.text(root, "footer", "bye").unwrap();

    let result = fx.run(root, Priority::Normal, Memo::default());
    // Boundary omitted: nothing committed before
    assert_eq!(texts(&result), vec!["bye"]);
    assert_eq!(
        result.pending,
        vec![PendingBoundary {
            node: feed,
            wake_at: Some(EXPIRATION),
        }]
    );
    assert_eq!(result.suspensions[1].region, Region::Fallback(feed));
    assert_eq!(result.updates[0].next, BoundaryMode::Capturing);
}

#[test]
fn test_expired_boundary_forces_fallback() {
    let mut fx = Fixture::new();
    let feed = fx
        .tree
        .suspense(Position::Root, "feed", BoundaryProps::default())
        .unwrap();
    let primary = fx.token();
    let fallback = fx.token();
    fx.waiting(feed, "post", primary);
    fx.tree
        .element(Position::Fallback(feed), "note", |ctx| {
            assert!(ctx.did_expire());
            RenderOutcome::ready("still loading")
        })
        .unwrap();
    fx.waiting(Position::Fallback(feed), "skeleton", fallback);

    let result = fx.run_with(feed, Priority::Normal, Memo::default(), None, EXPIRATION);
    assert!(result.forced);
    assert!(result.pending.is_empty());
    assert_eq!(texts(&result), vec!["still loading"]);
}

#[test]
fn test_sync_pass_cannot_wait_on_blocked_fallback() {
    let mut fx = Fixture::new();
    let feed = fx
        .tree
        .suspense(Position::Root, "feed", BoundaryProps::default())
        .unwrap();
    let primary = fx.token();
    let fallback = fx.token();
    fx.waiting(feed, "post", primary);
    fx.waiting(Position::Fallback(feed), "skeleton", fallback);

    let result = fx.run(feed, Priority::Sync, Memo::default());
    assert_eq!(result.pending[0].wake_at, None);
    assert!(!result.sync_committable());
}

#[test]
fn test_error_boundary_replaces_failed_subtree() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let guard = fx.tree.error_boundary(root, "guard").unwrap();
    fx.tree.text(guard, "ok", "fine").unwrap();
    fx.tree
        .element(guard, "broken", |_| RenderOutcome::failed("bad data"))
        .unwrap();
    let token = fx.token();
    fx.waiting(guard, "late", token);
    fx.tree
        .element(Position::Fallback(guard), "oops", |ctx| {
            let message = ctx.error().map(|e| e.message().to_string());
            RenderOutcome::Ready(format!("error: {}", message.unwrap_or_default()))
        })
        .unwrap();
    fx.tree.text(root, "footer", "bye").unwrap();

    let result = fx.run(root, Priority::Normal, Memo::default());
    assert_eq!(texts(&result), vec!["error: bad data", "bye"]);
    assert!(result.uncaught.is_none());
    // Work after the failure inside the boundary never ran
    assert!(result.suspensions.is_empty());
}

#[test]
fn test_uncaught_failure_aborts_pass() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let broken = fx
        .tree
        .element(root, "broken", |_| RenderOutcome::failed("bad"))
        .unwrap();
    fx.tree.text(root, "never", "x").unwrap();

    let result = fx.run(root, Priority::Normal, Memo::default());
    let (node, error) = result.uncaught.expect("failure should escape");
    assert_eq!(node, broken);
    assert_eq!(error.message(), "bad");
}

#[test]
fn test_rejected_node_fails_instead_of_rendering() {
    let mut fx = Fixture::new();
    let guard = fx.tree.error_boundary(Position::Root, "guard").unwrap();
    let token = fx.token();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let profile = fx
        .tree
        .element(guard, "profile", move |_| {
            counter.set(counter.get() + 1);
            RenderOutcome::ready("never shown")
        })
        .unwrap();
    fx.tree
        .element(Position::Fallback(guard), "oops", |ctx| {
            let token = ctx.error().and_then(RenderError::token);
            RenderOutcome::Ready(format!("rejected {}", token.map(|t| t.to_string()).unwrap_or_default()))
        })
        .unwrap();

    let mut rejected = FxHashMap::default();
    rejected.insert(profile, RenderError::rejected(token, "offline"));
    let mut pass =
        Pass::new(TaskId(1), guard, Priority::Normal, EXPIRATION, Memo::default()).with_rejections(rejected);
    let mut input = PassInput {
        tree: &fx.tree,
        registry: &mut fx.registry,
        prior: None,
        defaults: &fx.defaults,
        now: Time(10),
    };
    while !pass.step(&mut input) {}
    let result = pass.finish();

    assert_eq!(calls.get(), 0);
    assert_eq!(texts(&result), vec![format!("rejected {token}").as_str()]);
    assert!(result.suspensions.is_empty());
}

#[test]
fn test_suspending_on_settled_token_fails() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let token = fx.token();
    let stale = fx.waiting(root, "stale", token);
    fx.registry.settle(token, Outcome::Ready);

    let result = fx.run(root, Priority::Normal, Memo::default());
    let (node, error) = result.uncaught.expect("settled token cannot be waited on");
    assert_eq!(node, stale);
    assert!(error.message().contains("already settled"));
    assert!(result.suspensions.is_empty());
}

#[test]
fn test_memo_skips_ready_nodes_on_retry() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    fx.tree
        .element(root, "B", move |_| {
            counter.set(counter.get() + 1);
            RenderOutcome::ready("B")
        })
        .unwrap();

    let first = fx.run(root, Priority::Normal, Memo::default());
    assert_eq!(calls.get(), 1);
    let second = fx.run(root, Priority::Normal, first.memo);
    assert_eq!(calls.get(), 1);
    assert_eq!(texts(&second), vec!["B"]);
}

#[test]
fn test_hole_retains_prior_output_hidden() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    let token = fx.token();
    let a = fx.waiting(root, "A", token);

    let mut previous = OutputNode::new(root, "root", "");
    previous.children.push(OutputNode::new(a, "A", "old A"));
    let prior = previous.index();

    let result = fx.run_with(root, Priority::Normal, Memo::default(), Some(&prior), Time(10));
    let output = result.output.expect("root rendered");
    let kept = output.find("A").expect("prior output retained");
    assert!(kept.hidden);
    assert_eq!(kept.text, "old A");
    assert!(output.visible_texts().is_empty());
}

#[test]
fn test_steps_are_resumable() {
    let mut fx = Fixture::new();
    let root = fx.tree.group(Position::Root, "root").unwrap();
    for name in ["a", "b", "c"] {
        fx.tree.text(root, name, name).unwrap();
    }

    let mut pass = Pass::new(TaskId(1), root, Priority::Normal, EXPIRATION, Memo::default());
    let mut steps = 0;
    loop {
        let mut input = PassInput {
            tree: &fx.tree,
            registry: &mut fx.registry,
            prior: None,
            defaults: &fx.defaults,
            now: Time(steps),
        };
        steps += 1;
        if pass.step(&mut input) {
            break;
        }
    }
    assert!(pass.is_done());
    let result = pass.finish();
    assert_eq!(result.steps, steps as usize);
    assert_eq!(texts(&result), vec!["a", "b", "c"]);
}
