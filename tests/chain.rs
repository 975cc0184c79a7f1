mod common;

use klangraum::nodes::{Passthrough, Sine};
use klangraum::{AudioNode, Bus, BusLayout, ChainSource, Error, GraphNode, NodeChain, ProcessContext};
use proptest::prelude::*;

use common::engine;

fn passthrough(engine: &klangraum::Engine) -> GraphNode {
    engine.add_node(Passthrough::new(engine.channels())).unwrap()
}

#[test]
fn insert_and_remove_keep_the_path_intact() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let mut chain = NodeChain::new(
        Some(ChainSource::Owned(source.clone())),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    assert!(chain.is_linked());
    assert_eq!(source.output_destination(0), Some((engine.endpoint().id(), 0)));

    let a = passthrough(&engine);
    let b = passthrough(&engine);
    let c = passthrough(&engine);
    chain.add_node(&a, None, 0).unwrap();
    chain.add_node(&c, Some(&a), 0).unwrap();
    chain.add_node(&b, Some(&a), 0).unwrap();
    assert_eq!(chain.iter().cloned().collect::<Vec<_>>(), vec![a.clone(), b.clone(), c.clone()]);
    assert!(chain.is_linked());

    assert_eq!(chain.remove_node(&b), Ok(true));
    assert_eq!(a.output_destination(0), Some((c.id(), 0)));
    assert_eq!(b.output_destination(0), None);
    assert!(chain.is_linked());
}

#[test]
fn removing_twice_is_harmless() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let mut chain = NodeChain::new(
        Some(ChainSource::Owned(source)),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    let node = passthrough(&engine);
    chain.add_node(&node, None, 0).unwrap();

    assert_eq!(chain.remove_node(&node), Ok(true));
    assert_eq!(chain.remove_node(&node), Ok(false));
    assert!(chain.is_linked());

    assert_eq!(node.detach_output_bus(0), Ok(false));
    assert_eq!(node.detach_output_bus(0), Ok(false));
}

#[test]
fn failed_edits_change_nothing() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let mut chain = NodeChain::new(
        Some(ChainSource::Owned(source)),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    let a = passthrough(&engine);
    chain.add_node(&a, None, 0).unwrap();

    assert_eq!(chain.add_node(&a, None, 0), Err(Error::AlreadyInChain(a.id())));

    let outsider = passthrough(&engine);
    let b = passthrough(&engine);
    assert_eq!(
        chain.add_node(&b, Some(&outsider), 0),
        Err(Error::NotInChain(outsider.id()))
    );

    let mono = engine.add_node(Passthrough::new(1)).unwrap();
    assert!(matches!(
        chain.add_node(&mono, None, 0),
        Err(Error::ChannelMismatch { .. })
    ));
    assert_eq!(chain.len(), 1);
    assert!(chain.is_linked());
}

/// Mono in, stereo out.
struct Widen;

impl AudioNode for Widen {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            for buffer in output.iter_mut() {
                buffer.copy_from_slice(&input[0]);
            }
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::new(vec![1], vec![2])
    }
}

#[test]
fn failed_feed_into_the_new_node_rolls_back() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let mut chain = NodeChain::new(
        Some(ChainSource::Owned(source)),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    let a = passthrough(&engine);
    chain.add_node(&a, None, 0).unwrap();

    // Already wired somewhere else: the failed insert must put that back.
    let elsewhere = passthrough(&engine);
    let widen = engine.add_node(Widen).unwrap();
    widen.attach_output_bus(0, &elsewhere, 0).unwrap();

    assert_eq!(
        chain.add_node(&widen, Some(&a), 0),
        Err(Error::ChannelMismatch { output: 2, input: 1 })
    );
    assert_eq!(widen.output_destination(0), Some((elsewhere.id(), 0)));
    assert_eq!(elsewhere.input_connection_count(0), 1);
    assert_eq!(chain.len(), 1);
    assert!(!chain.contains(&widen));
    assert!(chain.is_linked());
    assert_eq!(a.output_destination(0), Some((engine.endpoint().id(), 0)));

    // Not wired before: left unattached.
    let fresh = engine.add_node(Widen).unwrap();
    assert!(chain.add_node(&fresh, None, 0).is_err());
    assert_eq!(fresh.output_destination(0), None);
    assert_eq!(chain.len(), 1);
    assert!(chain.is_linked());
}

#[test]
fn borrowed_source_is_not_kept_alive() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let chain = NodeChain::new(
        Some(ChainSource::Borrowed(source.downgrade())),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    assert!(!chain.owns_source());
    assert_eq!(source.reference_count(), 1);

    let id = source.id();
    drop(source);
    assert!(chain.source_node().is_none());
    assert_eq!(engine.endpoint().input_connection_count(0), 0, "{id:?} should be gone");
}

#[test]
fn clearing_wires_source_to_endpoint() {
    let engine = engine();
    let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
    let mut chain = NodeChain::new(
        Some(ChainSource::Owned(source.clone())),
        Some((engine.endpoint().clone(), 0)),
    )
    .unwrap();
    for _ in 0..3 {
        let node = passthrough(&engine);
        let last = chain.last().cloned();
        chain.add_node(&node, last.as_ref(), 0).unwrap();
    }
    chain.clear(true).unwrap();
    assert!(chain.is_empty());
    assert_eq!(source.output_destination(0), Some((engine.endpoint().id(), 0)));
    assert!(chain.is_linked());
}

#[derive(Clone, Debug)]
enum Edit {
    Insert(usize),
    Remove(usize),
    Endpoint,
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0usize..8).prop_map(Edit::Insert),
        2 => (0usize..8).prop_map(Edit::Remove),
        1 => Just(Edit::Endpoint),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_edit_sequence_stays_linked(edits in prop::collection::vec(edit(), 1..32)) {
        let engine = engine();
        let source = engine.add_node(Sine::new(220.0, 2)).unwrap();
        let ends = [engine.endpoint().clone(), passthrough(&engine)];
        ends[1].attach_output_bus(0, engine.endpoint(), 0).unwrap();
        let mut end = 0;
        let mut chain = NodeChain::new(
            Some(ChainSource::Owned(source)),
            Some((ends[end].clone(), 0)),
        )
        .unwrap();

        for edit in edits {
            match edit {
                Edit::Insert(at) => {
                    let node = passthrough(&engine);
                    chain.insert_at(at, &node, 0).unwrap();
                }
                Edit::Remove(at) if at < chain.len() => {
                    chain.remove_at(at).unwrap();
                }
                Edit::Remove(at) => {
                    prop_assert!(chain.remove_at(at).is_err());
                }
                Edit::Endpoint => {
                    end = 1 - end;
                    chain.set_endpoint(Some((ends[end].clone(), 0))).unwrap();
                }
            }
            prop_assert!(chain.is_linked());
        }

        let mut out = vec![0.0; 256];
        engine.read(&mut out);
        prop_assert!(out.iter().any(|s| *s != 0.0));
    }
}
