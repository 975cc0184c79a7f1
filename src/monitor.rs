//! The listener-change monitor: the first node of every spatializer chain.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::listener::{EpochCounter, Listeners};
use crate::math::Vec3;
use crate::mixer::MixerInner;
use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::copy_bus;
use crate::spatial::params::FULLY_SPATIALIZED_DISTANCE;
use crate::spatial::{ComponentRegistry, ComponentRole, SpatialParams};
use crate::worker::{ReconfigureQueue, ReconfigureRequest};

/// Outcome of one monitor poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    /// Nothing changed since the last block.
    Idle,
    /// Something changed and the listener-relative parameters were recomputed.
    Stale,
    /// A component swap is queued and has not been applied yet.
    ReconfigurePending,
}

/// Passes audio through unchanged and keeps its spatializer's parameters in sync with
/// the listeners.
///
/// Each block it compares the registry's epoch with the last one it saw. Only when they
/// differ (or a resync was requested, or the bound shape moved) does it recompute
/// distance and direction, update the reverb send volume and the binaural parameters,
/// and check whether the spatializer is using the components it should. Component swaps
/// are queued for the reconfiguration worker; nothing here allocates or edits the graph.
pub(crate) struct ListenerMonitor {
    channels: usize,
    params: Arc<SpatialParams>,
    listeners: Arc<Listeners>,
    registry: Arc<ComponentRegistry>,
    epoch: Arc<EpochCounter>,
    last_epoch: u32,
    queue: ReconfigureQueue,
    mixer: Weak<MixerInner>,
    /// A request the queue had no room for, retried next block.
    deferred: Option<ReconfigureRequest>,
}

impl ListenerMonitor {
    pub(crate) fn new(
        channels: usize,
        params: Arc<SpatialParams>,
        listeners: Arc<Listeners>,
        registry: Arc<ComponentRegistry>,
        queue: ReconfigureQueue,
        mixer: Weak<MixerInner>,
    ) -> Self {
        let epoch = registry.epoch().clone();
        Self {
            channels,
            params,
            listeners,
            registry,
            epoch,
            last_epoch: EpochCounter::SENTINEL,
            queue,
            mixer,
            deferred: None,
        }
    }

    pub(crate) fn poll(&mut self) -> MonitorState {
        if let Some(request) = self.deferred.take() {
            self.deferred = self.queue.try_push(request).err();
        }

        let epoch = self.epoch.current();
        let forced = self.params.force_resync.swap(false, Ordering::AcqRel);
        let moved = match self.params.shape.load().as_ref() {
            Some(binding) if binding.0.take_moved() => {
                self.params.position.store(binding.0.position());
                true
            }
            _ => false,
        };

        if epoch == self.last_epoch && !forced && !moved {
            return self.idle_state();
        }
        self.last_epoch = epoch;
        self.params.resyncs.fetch_add(1, Ordering::AcqRel);

        self.update_listener();
        self.reconcile();
        match self.idle_state() {
            MonitorState::Idle => MonitorState::Stale,
            pending => pending,
        }
    }

    fn idle_state(&self) -> MonitorState {
        if self.params.reconfigure_pending.load(Ordering::Acquire) {
            MonitorState::ReconfigurePending
        } else {
            MonitorState::Idle
        }
    }

    fn update_listener(&self) {
        let params = &self.params;
        let position = params.position.load();
        let listener = params
            .pinned_listener()
            .filter(|&l| self.listeners.is_enabled(l))
            .or_else(|| self.listeners.find_closest(position));
        let Some((index, snapshot)) = listener.and_then(|l| self.listeners.snapshot(l).ok().map(|s| (l, s))) else {
            params.valid.store(false, Ordering::Release);
            params.listener.store(u32::MAX, Ordering::Release);
            return;
        };

        let offset = position - snapshot.position;
        let distance = offset.length();
        if !distance.is_finite() {
            params.valid.store(false, Ordering::Release);
            return;
        }
        let direction = snapshot.to_local(offset).normalize_or_zero();

        params.listener_distance.set(distance);
        params.listener_direction.store(direction);
        params.listener.store(index as u32, Ordering::Release);
        params.valid.store(true, Ordering::Release);

        if let Some(send) = params.reverb_send.load().as_ref() {
            send.splitter.set_volume(1, send.curve.volume_at(distance));
        }

        let current = SpatialParams::load_id(&params.current_panner);
        if current.is_some_and(|id| self.registry.is_binaural(ComponentRole::Panner, id)) {
            let daf = params.directional_attenuation_factor.get();
            let direction = if direction == Vec3::ZERO { Vec3::FORWARD } else { direction };
            params.binaural_direction.store(direction * daf.max(f32::EPSILON));
            params
                .binaural_blend
                .set((distance * daf / FULLY_SPATIALIZED_DISTANCE).clamp(0.0, 1.0));
        }
    }

    /// Queue a swap if the registry now resolves the preferred components differently
    /// from what is wired.
    fn reconcile(&mut self) {
        let params = &self.params;
        if self.deferred.is_some() || params.reconfigure_pending.load(Ordering::Acquire) {
            return;
        }
        // Some(None) when the wired component must go and nothing replaces it.
        let wanted = |role: ComponentRole, preferred: &AtomicU32, current: &AtomicU32| {
            let target = self.registry.resolve(role, SpatialParams::load_id(preferred));
            (target != SpatialParams::load_id(current)).then_some(target)
        };
        let panner = wanted(ComponentRole::Panner, &params.preferred_panner, &params.current_panner);
        let attenuator = wanted(
            ComponentRole::Attenuator,
            &params.preferred_attenuator,
            &params.current_attenuator,
        );
        if panner.is_none() && attenuator.is_none() {
            return;
        }
        if self.queue.is_full() {
            // retry on the next block
            params.force_resync.store(true, Ordering::Release);
            return;
        }
        let Some(mixer) = self.mixer.upgrade() else {
            return;
        };

        params.reconfigure_pending.store(true, Ordering::Release);
        let request = ReconfigureRequest {
            mixer,
            panner,
            attenuator,
        };
        self.deferred = self.queue.try_push(request).err();
    }
}

impl AudioNode for ListenerMonitor {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            copy_bus(input, output);
        }
        self.poll();
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "listener_monitor"
    }
}
