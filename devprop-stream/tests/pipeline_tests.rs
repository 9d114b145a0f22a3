//! Integration tests for stream pipelines built on a provider.
//!
//! These tests drive updates from a scripted provider through middleware
//! chains and the synchronizer, the way a client assembles them.

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;
use serde_json::json;

use devprop_stream::testing::ScriptedProvider;
use devprop_stream::{
    FnMiddleware, NoopMiddleware, PropertyAccessQuery, PropertyStream, Provider, StreamHandler,
    StreamMiddleware, StreamUpdate, SynchronizerMiddleware,
};

#[derive(Default)]
struct Collect {
    seen: Mutex<Vec<StreamUpdate>>,
}

impl Collect {
    fn params(&self) -> Vec<i64> {
        self.seen
            .lock()
            .iter()
            .filter_map(|u| u.value().ok()?.get("param")?.as_i64())
            .collect()
    }
}

impl StreamHandler for Collect {
    fn response_received(&self, update: &StreamUpdate) {
        self.seen.lock().push(Arc::clone(update));
    }
}

fn subscribe(
    provider: &ScriptedProvider,
    middlewares: &[&dyn StreamMiddleware],
    query: &PropertyAccessQuery,
) -> (Arc<dyn PropertyStream>, Arc<Collect>, Arc<dyn StreamHandler>) {
    let stream = middlewares
        .iter()
        .fold(provider.create_property_stream(query), |stream, mw| {
            mw.wrap_stream(stream)
        });
    let collect = Arc::new(Collect::default());
    let handler: Arc<dyn StreamHandler> = Arc::clone(&collect) as Arc<dyn StreamHandler>;
    stream.start(&handler);
    (stream, collect, handler)
}

#[test]
fn test_middlewares_compose_outward_in_order() {
    let provider = ScriptedProvider::new();
    let query = PropertyAccessQuery::new("dev", "prop", "");

    let double = FnMiddleware::map(|u| {
        let p = u.value().ok().and_then(|v| v.get("param")).and_then(|p| p.as_i64()).unwrap_or(0);
        let query = u.query().clone();
        Arc::new(devprop_stream::PropertyAccessResponse::success(
            query,
            devprop_stream::AcquiredPropertyData::from_json(json!({ "param": p * 2 })),
        ))
    });
    let drop_small = FnMiddleware::filter(|u| {
        u.value()
            .ok()
            .and_then(|v| v.get("param"))
            .and_then(|p| p.as_i64())
            .is_some_and(|p| p >= 4)
    });

    // Doubling runs first, so the filter sees doubled values.
    let (_stream, collect, _handler) = subscribe(&provider, &[&double, &drop_small], &query);
    for i in 0..4 {
        provider.emit(&query, json!({ "param": i }));
    }
    assert_eq!(collect.params(), vec![4, 6]);
}

#[test]
fn test_noop_middleware_stack_is_transparent() {
    let provider = ScriptedProvider::new();
    let query = PropertyAccessQuery::new("dev", "prop", "");

    let (_s1, plain, _h1) = subscribe(&provider, &[], &query);
    let (_s2, wrapped, _h2) = subscribe(&provider, &[&NoopMiddleware, &NoopMiddleware], &query);

    provider.emit(&query, json!({ "param": 1 }));
    provider.emit_error(&query, "glitch");
    provider.emit(&query, json!({ "param": 2 }));

    assert_eq!(plain.params(), wrapped.params());
    assert_eq!(plain.seen.lock().len(), 3);
    assert_eq!(wrapped.seen.lock().len(), 3);
}

#[test]
fn test_synchronizer_aligns_two_properties() {
    let provider = ScriptedProvider::new();
    let sync = SynchronizerMiddleware::new();
    let bpm = PropertyAccessQuery::new("dev", "BPM", "");
    let bct = PropertyAccessQuery::new("dev", "BCT", "");

    let (_s1, bpm_out, _h1) = subscribe(&provider, &[&sync], &bpm);
    let (_s2, bct_out, _h2) = subscribe(&provider, &[&sync], &bct);

    provider.emit(&bpm, json!({ "param": 1 }));
    provider.emit(&bpm, json!({ "param": 2 }));
    assert!(bpm_out.params().is_empty());

    provider.emit(&bct, json!({ "param": 100 }));
    assert_eq!(bpm_out.params(), vec![2]);
    assert_eq!(bct_out.params(), vec![100]);
    assert_eq!(sync.pending_count(), 0);
}

#[test]
fn test_stop_detaches_whole_chain() {
    let provider = ScriptedProvider::new();
    let query = PropertyAccessQuery::new("dev", "prop", "");
    let passthrough = FnMiddleware::new(|u| Some(Arc::clone(u)));

    let (stream, collect, handler) = subscribe(&provider, &[&passthrough, &passthrough], &query);
    let root = provider.streams_for(&query).remove(0);
    assert_eq!(root.handler_count(), 1);

    stream.stop(&handler).unwrap();
    assert_eq!(root.handler_count(), 0);
    provider.emit(&query, json!({ "param": 9 }));
    assert!(collect.params().is_empty());
    assert!(stream.stop(&handler).is_err());
}

#[rstest]
#[case::noop(vec![Stage::Noop], 2)]
#[case::single_chain(vec![Stage::Pass], 1)]
#[case::nested_chains(vec![Stage::Pass, Stage::Pass], 1)]
#[case::synchronizer(vec![Stage::Sync], 1)]
#[case::chain_then_synchronizer(vec![Stage::Pass, Stage::Sync], 1)]
fn test_every_handler_receives_each_update_once(
    #[case] stages: Vec<Stage>,
    #[case] root_handlers: usize,
) {
    let provider = ScriptedProvider::new();
    let query = PropertyAccessQuery::new("dev", "prop", "");
    let middlewares: Vec<Box<dyn StreamMiddleware>> = stages.iter().map(Stage::build).collect();
    let refs: Vec<&dyn StreamMiddleware> = middlewares.iter().map(|m| m.as_ref()).collect();

    let (stream, first, _h1) = subscribe(&provider, &refs, &query);
    let second = Arc::new(Collect::default());
    stream.start(&(Arc::clone(&second) as Arc<dyn StreamHandler>));

    provider.emit(&query, json!({ "param": 1 }));
    provider.emit(&query, json!({ "param": 2 }));
    assert_eq!(first.params(), vec![1, 2]);
    assert_eq!(second.params(), vec![1, 2]);
    assert_eq!(provider.streams_for(&query)[0].handler_count(), root_handlers);
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Noop,
    Pass,
    Sync,
}

impl Stage {
    fn build(&self) -> Box<dyn StreamMiddleware> {
        match self {
            Stage::Noop => Box::new(NoopMiddleware),
            Stage::Pass => Box::new(FnMiddleware::new(|u| Some(Arc::clone(u)))),
            Stage::Sync => Box::new(SynchronizerMiddleware::new()),
        }
    }
}
