mod common;

use approx::assert_relative_eq;
use klangraum::nodes::{Passthrough, Sine};
use klangraum::{db_to_linear, Error, ReverbBus, ReverbCurve, ReverbPlacement, Vec3};
use proptest::prelude::*;

use common::{engine, peak, render_blocks};

#[test]
fn attaching_and_detaching_a_send() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();
    assert_eq!(bus.reference_count(), 1);

    spatializer.set_reverb3d(Some(&bus), ReverbPlacement::PostPan).unwrap();
    assert_eq!(spatializer.reverb3d(), Some(bus.clone()));
    assert_eq!(bus.reference_count(), 2);
    assert_eq!(spatializer.nodes().len(), 4);
    assert!(spatializer.is_linked());

    // monitor, panner, send, attenuator
    let nodes = spatializer.nodes();
    assert_eq!(Some(&nodes[2]), spatializer.reverb_send().as_ref());
    assert_eq!(nodes[3], spatializer.attenuator().unwrap());

    spatializer.set_reverb3d(None, ReverbPlacement::PostPan).unwrap();
    assert_eq!(spatializer.reverb3d(), None);
    assert_eq!(bus.reference_count(), 1);
    assert_eq!(spatializer.nodes().len(), 3);
    assert!(spatializer.is_linked());
}

#[test]
fn placement_decides_the_send_position() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();

    for (placement, index) in [
        (ReverbPlacement::PrePan, 1),
        (ReverbPlacement::PostPan, 2),
        (ReverbPlacement::PostAttenuate, 3),
    ] {
        spatializer.set_reverb3d(Some(&bus), placement).unwrap();
        let send = spatializer.reverb_send().unwrap();
        assert_eq!(spatializer.nodes().iter().position(|n| *n == send), Some(index));
        assert_eq!(spatializer.reverb3d_placement(), placement);
        assert!(spatializer.is_linked());
    }
    assert_eq!(bus.reference_count(), 2);
}

#[test]
fn failed_send_keeps_the_previous_placement() {
    let engine = engine();
    let other = common::engine();
    let foreign = ReverbBus::new(&other, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();

    assert!(spatializer
        .set_reverb3d(Some(&foreign), ReverbPlacement::PrePan)
        .is_err());
    assert_eq!(spatializer.reverb3d_placement(), ReverbPlacement::PostPan);
    assert_eq!(spatializer.reverb3d(), None);
    assert_eq!(spatializer.reverb_send(), None);
    assert_eq!(foreign.reference_count(), 1);
    assert_eq!(spatializer.nodes().len(), 3);
    assert!(spatializer.is_linked());
}

#[test]
fn component_swaps_keep_the_send_in_place() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();
    spatializer.set_reverb3d(Some(&bus), ReverbPlacement::PostPan).unwrap();

    engine.registry().set_global_hrtf(true).unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();

    let nodes = spatializer.nodes();
    assert_eq!(nodes.len(), 4);
    assert_eq!(nodes[1], spatializer.panner().unwrap());
    assert_eq!(Some(&nodes[2]), spatializer.reverb_send().as_ref());
    assert!(spatializer.is_linked());
}

#[test]
fn send_volume_follows_listener_distance() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    mixer.spatializer().set_reverb3d(Some(&bus), ReverbPlacement::PostPan).unwrap();
    let send = mixer.spatializer().reverb_send().unwrap();
    assert_relative_eq!(send.output_bus_volume(1), bus.get_volume_at(0.0));

    mixer.set_position_3d(Vec3::new(0.0, 0.0, -3.0));
    render_blocks(&engine, 1);
    assert_relative_eq!(send.output_bus_volume(1), bus.get_volume_at(3.0));

    bus.set_volume_range(0.1, 0.9).unwrap();
    render_blocks(&engine, 1);
    assert_relative_eq!(send.output_bus_volume(1), 0.1 + 0.8 * 3.0 / 7.0, epsilon = 1e-6);
}

#[test]
fn reverb_effect_sits_between_bus_and_destination() {
    let engine = engine();
    let effect = engine.add_node(Passthrough::new(2)).unwrap();
    let bus = ReverbBus::new(&engine, Some(effect.clone()), None).unwrap();
    assert_eq!(bus.node().output_destination(0), Some((effect.id(), 0)));
    assert_eq!(effect.output_destination(0), Some((engine.endpoint().id(), 0)));

    let target = engine.new_mixer(None).unwrap();
    bus.set_mixer(Some(&target)).unwrap();
    assert_eq!(effect.output_destination(0), Some((target.input().id(), 0)));

    bus.set_reverb(None).unwrap();
    assert_eq!(bus.node().output_destination(0), Some((target.input().id(), 0)));
    assert_eq!(effect.output_destination(0), None);
}

#[test]
fn wet_signal_reaches_the_endpoint() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let tone = engine.add_node(Sine::new(330.0, 2)).unwrap();
    tone.attach_output_bus(0, mixer.input(), 0).unwrap();
    mixer.spatializer().set_reverb3d(Some(&bus), ReverbPlacement::PrePan).unwrap();

    let with_send = peak(&render_blocks(&engine, 4));
    mixer.spatializer().set_reverb3d(None, ReverbPlacement::PrePan).unwrap();
    render_blocks(&engine, 1);
    let dry = peak(&render_blocks(&engine, 4));
    assert!(with_send > dry);
}

#[test]
fn curve_setters_validate() {
    let engine = engine();
    let bus = ReverbBus::new(&engine, None, None).unwrap();
    assert_relative_eq!(bus.min_volume(), db_to_linear(-7.0));
    assert_relative_eq!(bus.max_volume(), db_to_linear(-5.0));
    assert_eq!(bus.max_volume_distance(), 7.0);

    assert!(matches!(bus.set_min_volume(2.0), Err(Error::InvalidParameter(_))));
    assert!(bus.set_max_volume_distance(0.0).is_err());
    bus.set_max_volume_distance(15.0).unwrap();
    assert_relative_eq!(bus.get_volume_at(15.0), db_to_linear(-5.0));

    let epoch = engine.epoch().current();
    bus.set_min_volume(0.0).unwrap();
    assert_ne!(engine.epoch().current(), epoch);
}

proptest! {
    #[test]
    fn curve_is_monotonic_and_bounded(
        min in 0.0f32..2.0,
        span in 0.0f32..2.0,
        mvd in 0.1f32..50.0,
        a in 0.0f32..100.0,
        b in 0.0f32..100.0,
    ) {
        let curve = ReverbCurve::new(min, min + span, mvd).unwrap();
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let (v_near, v_far) = (curve.volume_at(near), curve.volume_at(far));
        prop_assert!(v_near <= v_far);
        prop_assert!(v_near >= curve.min_volume() && v_far <= curve.max_volume());
        if near >= mvd {
            prop_assert_eq!(v_near, v_far);
        }
    }
}
