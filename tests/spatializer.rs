mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use klangraum::nodes::Sine;
use klangraum::spatial::{builtin, Component, ComponentContext, ComponentRole, Shape};
use klangraum::{AudioNode, Error, Vec3, BLOCK_SIZE};

use common::{engine, peak, render_blocks};

#[test]
fn monitor_resyncs_once_per_burst_of_listener_moves() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    mixer.set_position_3d(Vec3::new(1.0, 0.0, -2.0));
    let params = mixer.spatializer().params().clone();

    render_blocks(&engine, 1);
    assert_eq!(params.resync_count(), 1);
    render_blocks(&engine, 1);
    assert_eq!(params.resync_count(), 1);

    for i in 0..10 {
        engine.set_listener_position(0, Vec3::new(i as f32 * 0.1, 0.0, 0.0)).unwrap();
    }
    render_blocks(&engine, 1);
    assert_eq!(params.resync_count(), 2);
    // the last move wins: listener at (0.9, 0, 0), mixer at (1, 0, -2)
    assert_relative_eq!(params.snapshot().distance, 4.01f32.sqrt(), epsilon = 1e-5);
    render_blocks(&engine, 1);
    assert_eq!(params.resync_count(), 2);
}

#[test]
fn monitor_tracks_distance_and_direction() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    mixer.set_position_3d(Vec3::new(3.0, 0.0, 0.0));
    render_blocks(&engine, 1);

    assert_eq!(mixer.listener(), Some(0));
    let snapshot = mixer.spatializer().params().snapshot();
    assert!(snapshot.valid);
    assert_relative_eq!(snapshot.distance, 3.0);
    assert_relative_eq!(snapshot.direction.x, 1.0);
    assert_eq!(mixer.distance_to_listener(), Some(3.0));

    engine.set_listener_enabled(0, false).unwrap();
    render_blocks(&engine, 1);
    assert!(!mixer.spatializer().params().snapshot().valid);
    assert_eq!(mixer.listener(), None);
}

#[test]
fn queued_reconfigurations_apply_in_order() {
    let engine = engine();
    engine
        .registry()
        .set_panner_enabled(builtin::BINAURAL_PANNER, true)
        .unwrap();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();
    let before = spatializer.panner_swaps();
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BASIC_PANNER));

    engine
        .request_reconfiguration(&mixer, Some(builtin::BINAURAL_PANNER), None)
        .unwrap();
    engine
        .request_reconfiguration(&mixer, Some(builtin::BASIC_PANNER), None)
        .unwrap();
    engine.flush_reconfigurations();

    assert_eq!(engine.pending_reconfigurations(), 0);
    assert_eq!(spatializer.panner_swaps(), before + 2);
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BASIC_PANNER));
    assert!(spatializer.is_linked());
    assert_eq!(spatializer.nodes().len(), 3);
}

#[test]
fn disabling_the_last_enabled_panner_empties_the_slot() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();
    render_blocks(&engine, 1);
    let before = spatializer.panner_swaps();
    assert_eq!(spatializer.nodes().len(), 3);

    engine
        .registry()
        .set_panner_enabled(builtin::BASIC_PANNER, false)
        .unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();

    assert_eq!(spatializer.current_panner_id(), None);
    assert!(spatializer.panner().is_none());
    assert_eq!(spatializer.panner_swaps(), before + 1);
    assert_eq!(spatializer.nodes().len(), 2);
    assert_eq!(spatializer.current_attenuator_id(), Some(builtin::BASIC_ATTENUATOR));
    assert!(spatializer.is_linked());

    engine
        .registry()
        .set_panner_enabled(builtin::BASIC_PANNER, true)
        .unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();

    assert_eq!(spatializer.current_panner_id(), Some(builtin::BASIC_PANNER));
    assert_eq!(spatializer.nodes().len(), 3);
    assert!(spatializer.is_linked());
}

#[test]
fn empty_reconfiguration_is_rejected() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    assert!(matches!(
        engine.request_reconfiguration(&mixer, None, None),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn global_hrtf_switches_every_mixer() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    let tone = engine.add_node(Sine::new(440.0, 2)).unwrap();
    tone.attach_output_bus(0, mixer.input(), 0).unwrap();
    mixer.set_position_3d(Vec3::new(2.0, 0.0, -1.0));
    render_blocks(&engine, 1);

    engine.registry().set_global_hrtf(true).unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();

    let spatializer = mixer.spatializer();
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BINAURAL_PANNER));
    assert_eq!(
        spatializer.current_attenuator_id(),
        Some(builtin::INVERSE_DISTANCE_ATTENUATOR)
    );
    assert_eq!(spatializer.preferred_panner_id(), Some(builtin::BASIC_PANNER));
    assert!(spatializer.is_linked());
    assert!(peak(&render_blocks(&engine, 4)) > 0.0);

    engine.registry().set_global_hrtf(false).unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BASIC_PANNER));
    assert_eq!(spatializer.current_attenuator_id(), Some(builtin::BASIC_ATTENUATOR));
}

#[test]
fn preferring_a_disabled_component_waits_for_it() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    let spatializer = mixer.spatializer();

    assert!(matches!(
        spatializer.set_panner_by_id(builtin::BINAURAL_PANNER),
        Err(Error::ComponentDisabled { .. })
    ));
    assert_eq!(spatializer.preferred_panner_id(), Some(builtin::BASIC_PANNER));
    assert!(matches!(
        spatializer.set_preferred_panner_id(42),
        Err(Error::UnknownComponent { .. })
    ));

    spatializer.set_preferred_panner_id(builtin::BINAURAL_PANNER).unwrap();
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BASIC_PANNER));

    engine
        .registry()
        .set_panner_enabled(builtin::BINAURAL_PANNER, true)
        .unwrap();
    render_blocks(&engine, 1);
    engine.flush_reconfigurations();
    assert_eq!(spatializer.current_panner_id(), Some(builtin::BINAURAL_PANNER));
}

#[test]
fn custom_components_can_be_registered_and_selected() {
    struct Mute(usize);

    impl AudioNode for Mute {
        fn process(&mut self, _ctx: &klangraum::ProcessContext, _inputs: &[klangraum::Bus], outputs: &mut [klangraum::Bus]) {
            for buffer in outputs[0].iter_mut() {
                buffer.fill(0.0);
            }
        }

        fn layout(&self) -> klangraum::BusLayout {
            klangraum::BusLayout::effect(self.0)
        }
    }

    let engine = engine();
    let id = engine
        .registry()
        .register_attenuator(Component::new("mute", |ctx: &ComponentContext<'_>| {
            Ok(Box::new(Mute(ctx.engine.channels())) as Box<dyn AudioNode>)
        }))
        .unwrap();

    let mixer = engine.new_mixer(None).unwrap();
    let tone = engine.add_node(Sine::new(440.0, 2)).unwrap();
    tone.attach_output_bus(0, mixer.input(), 0).unwrap();
    assert!(peak(&render_blocks(&engine, 2)) > 0.0);

    mixer.spatializer().set_attenuator_by_id(id).unwrap();
    assert_eq!(mixer.spatializer().current_attenuator_id(), Some(id));
    assert_eq!(
        engine.registry().name(ComponentRole::Attenuator, id),
        Some("mute")
    );
    assert_eq!(peak(&render_blocks(&engine, 2)), 0.0);
}

#[test]
fn distance_attenuates_and_panning_follows_direction() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    let tone = engine.add_node(Sine::new(440.0, 2)).unwrap();
    tone.attach_output_bus(0, mixer.input(), 0).unwrap();

    mixer.set_position_3d(Vec3::new(0.0, 0.0, -0.5));
    render_blocks(&engine, 8);
    let near = peak(&render_blocks(&engine, 8));

    mixer.set_position_3d(Vec3::new(4.0, 0.0, 0.0));
    render_blocks(&engine, 8);
    let far = render_blocks(&engine, 8);
    assert!(peak(&far) < near);

    let left: f32 = far.iter().step_by(2).map(|s| s.abs()).sum();
    let right: f32 = far.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
    assert!(right > left, "source on the right should be louder on the right");
}

#[test]
fn disabling_spatialization_passes_audio_unchanged() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    let tone = engine.add_node(Sine::new(440.0, 2)).unwrap();
    tone.attach_output_bus(0, mixer.input(), 0).unwrap();
    mixer.set_position_3d(Vec3::new(20.0, 0.0, 0.0));
    mixer.set_spatialization_enabled(false);

    let out = render_blocks(&engine, 8);
    let left: Vec<f32> = out.iter().step_by(2).copied().collect();
    let right: Vec<f32> = out.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(left, right);
    assert!(peak(&out) > 0.2);
}

struct Orbit {
    moved: AtomicBool,
}

impl Shape for Orbit {
    fn position(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, -6.0)
    }

    fn take_moved(&self) -> bool {
        self.moved.swap(false, Ordering::AcqRel)
    }
}

#[test]
fn bound_shape_moves_the_mixer() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    mixer.bind_shape(Some(Arc::new(Orbit {
        moved: AtomicBool::new(true),
    })));
    render_blocks(&engine, 1);
    assert_eq!(mixer.position_3d(), Vec3::new(0.0, 0.0, -6.0));
    let resyncs = mixer.spatializer().params().resync_count();
    render_blocks(&engine, 1);
    assert_eq!(mixer.spatializer().params().resync_count(), resyncs);
}

#[test]
fn attribute_setters_validate_and_clamp() {
    let engine = engine();
    let mixer = engine.new_mixer(None).unwrap();
    assert!(mixer.set_min_distance(-1.0).is_err());
    assert!(mixer.set_max_gain(f32::NAN).is_err());
    mixer.set_rolloff(500.0);
    assert_eq!(mixer.rolloff(), 100.0);
    mixer.set_directional_attenuation_factor(f32::NAN);
    assert_eq!(mixer.directional_attenuation_factor(), 0.0);
    assert_eq!(mixer.set_pinned_listener(Some(3)), Err(Error::InvalidListener(3)));
    mixer.set_pinned_listener(Some(0)).unwrap();
    assert_eq!(mixer.pinned_listener(), Some(0));
    assert_eq!(BLOCK_SIZE, 64);
}
