//! Registry of panner and attenuator factories keyed by small integer IDs.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::listener::EpochCounter;
use crate::node::AudioNode;
use crate::spatial::binaural::BinauralPanner;
use crate::spatial::components::{BasicAttenuator, BasicPanner, InverseDistanceAttenuator};
use crate::spatial::SpatialParams;

/// Identifier handed out by [`ComponentRegistry::register`].
pub type ComponentId = u32;

/// Maximum number of registered components per role.
pub const MAX_COMPONENTS: usize = 32;

const NONE: u32 = u32::MAX;

/// The two component slots of a spatializer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    Panner,
    Attenuator,
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRole::Panner => f.write_str("panner"),
            ComponentRole::Attenuator => f.write_str("attenuator"),
        }
    }
}

/// What a factory gets to build a component for one spatializer.
pub struct ComponentContext<'a> {
    pub engine: &'a Engine,
    pub params: &'a Arc<SpatialParams>,
}

pub type ComponentFactory = Arc<dyn Fn(&ComponentContext<'_>) -> Result<Box<dyn AudioNode>> + Send + Sync>;

/// A component implementation offered to the registry.
pub struct Component {
    name: &'static str,
    factory: ComponentFactory,
    enabled: bool,
    binaural: bool,
}

impl Component {
    pub fn new<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn(&ComponentContext<'_>) -> Result<Box<dyn AudioNode>> + Send + Sync + 'static,
    {
        Self {
            name,
            factory: Arc::new(factory),
            enabled: true,
            binaural: false,
        }
    }

    /// Whether the component starts enabled. Defaults to true.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Mark the component as reading the binaural direction and blend parameters, which
    /// monitors then keep up to date.
    pub fn binaural(mut self) -> Self {
        self.binaural = true;
        self
    }
}

struct Entry {
    name: &'static str,
    factory: ComponentFactory,
}

/// One role's table. Flags live in fixed atomic arrays so the render thread can read
/// them without touching the lock.
struct RoleTable {
    entries: RwLock<Vec<Entry>>,
    enabled: Box<[AtomicBool]>,
    binaural: Box<[AtomicBool]>,
    count: AtomicU32,
    default: AtomicU32,
}

impl RoleTable {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            enabled: (0..MAX_COMPONENTS).map(|_| AtomicBool::new(false)).collect(),
            binaural: (0..MAX_COMPONENTS).map(|_| AtomicBool::new(false)).collect(),
            count: AtomicU32::new(0),
            default: AtomicU32::new(NONE),
        }
    }

    fn contains(&self, id: ComponentId) -> bool {
        id < self.count.load(Ordering::Acquire)
    }

    fn is_enabled(&self, id: ComponentId) -> bool {
        self.contains(id) && self.enabled[id as usize].load(Ordering::Acquire)
    }
}

/// IDs of the components every registry built with [`ComponentRegistry::with_builtins`] has.
pub mod builtin {
    use super::ComponentId;

    pub const BASIC_PANNER: ComponentId = 0;
    pub const BINAURAL_PANNER: ComponentId = 1;
    pub const BASIC_ATTENUATOR: ComponentId = 0;
    pub const INVERSE_DISTANCE_ATTENUATOR: ComponentId = 1;
}

/// Maps component IDs to factories for both roles.
///
/// Registration and enable/disable happen on caller threads. Enabling or disabling a
/// component bumps the registry's epoch counter so every monitor re-evaluates which
/// component its spatializer should be using.
pub struct ComponentRegistry {
    panners: RoleTable,
    attenuators: RoleTable,
    epoch: Arc<EpochCounter>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new(epoch: Arc<EpochCounter>) -> Self {
        Self {
            panners: RoleTable::new(),
            attenuators: RoleTable::new(),
            epoch,
        }
    }

    /// A registry holding the built-in components: the basic panner and attenuator
    /// (enabled, and the defaults), and the binaural panner and inverse-distance
    /// attenuator (disabled until HRTF is switched on).
    pub fn with_builtins(epoch: Arc<EpochCounter>) -> Self {
        let registry = Self::new(epoch);
        let builtins = [
            (
                ComponentRole::Panner,
                Component::new("basic_panner", |ctx: &ComponentContext<'_>| {
                    Ok(Box::new(BasicPanner::new(ctx.engine.channels(), ctx.params.clone())) as Box<dyn AudioNode>)
                }),
            ),
            (
                ComponentRole::Panner,
                Component::new("binaural_panner", |ctx: &ComponentContext<'_>| {
                    let panner = BinauralPanner::new(ctx.engine.sample_rate(), ctx.engine.channels(), ctx.params.clone())?;
                    Ok(Box::new(panner) as Box<dyn AudioNode>)
                })
                .enabled(false)
                .binaural(),
            ),
            (
                ComponentRole::Attenuator,
                Component::new("basic_attenuator", |ctx: &ComponentContext<'_>| {
                    Ok(Box::new(BasicAttenuator::new(ctx.engine.channels(), ctx.params.clone())) as Box<dyn AudioNode>)
                }),
            ),
            (
                ComponentRole::Attenuator,
                Component::new("inverse_distance_attenuator", |ctx: &ComponentContext<'_>| {
                    Ok(Box::new(InverseDistanceAttenuator::new(ctx.engine.channels(), ctx.params.clone()))
                        as Box<dyn AudioNode>)
                })
                .enabled(false),
            ),
        ];
        for (role, component) in builtins {
            // A fresh registry has room for four components.
            let _ = registry.register(role, component);
        }
        registry.table(ComponentRole::Panner).default.store(builtin::BASIC_PANNER, Ordering::Release);
        registry
            .table(ComponentRole::Attenuator)
            .default
            .store(builtin::BASIC_ATTENUATOR, Ordering::Release);
        registry
    }

    /// The process-wide registry with built-ins, bumping [`EpochCounter::global`].
    pub fn global() -> Arc<ComponentRegistry> {
        static GLOBAL: OnceLock<Arc<ComponentRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(ComponentRegistry::with_builtins(EpochCounter::global())))
            .clone()
    }

    pub fn epoch(&self) -> &Arc<EpochCounter> {
        &self.epoch
    }

    fn table(&self, role: ComponentRole) -> &RoleTable {
        match role {
            ComponentRole::Panner => &self.panners,
            ComponentRole::Attenuator => &self.attenuators,
        }
    }

    /// Register a component and return its ID. IDs count up from 0 per role.
    pub fn register(&self, role: ComponentRole, component: Component) -> Result<ComponentId> {
        let table = self.table(role);
        let mut entries = table.entries.write();
        if entries.len() >= MAX_COMPONENTS {
            return Err(Error::RegistryFull(MAX_COMPONENTS));
        }
        let id = entries.len() as ComponentId;
        table.enabled[id as usize].store(component.enabled, Ordering::Release);
        table.binaural[id as usize].store(component.binaural, Ordering::Release);
        entries.push(Entry {
            name: component.name,
            factory: component.factory,
        });
        table.count.store(id + 1, Ordering::Release);
        debug!(%role, id, name = component.name, enabled = component.enabled, "component registered");
        Ok(id)
    }

    pub fn register_panner(&self, component: Component) -> Result<ComponentId> {
        self.register(ComponentRole::Panner, component)
    }

    pub fn register_attenuator(&self, component: Component) -> Result<ComponentId> {
        self.register(ComponentRole::Attenuator, component)
    }

    pub fn count(&self, role: ComponentRole) -> usize {
        self.table(role).count.load(Ordering::Acquire) as usize
    }

    pub fn name(&self, role: ComponentRole, id: ComponentId) -> Option<&'static str> {
        self.table(role).entries.read().get(id as usize).map(|e| e.name)
    }

    pub fn contains(&self, role: ComponentRole, id: ComponentId) -> bool {
        self.table(role).contains(id)
    }

    /// Lock-free.
    pub fn is_enabled(&self, role: ComponentRole, id: ComponentId) -> bool {
        self.table(role).is_enabled(id)
    }

    /// Lock-free.
    pub fn is_binaural(&self, role: ComponentRole, id: ComponentId) -> bool {
        let table = self.table(role);
        table.contains(id) && table.binaural[id as usize].load(Ordering::Acquire)
    }

    /// Enable or disable a component. Bumps the epoch when the flag actually changes.
    pub fn set_enabled(&self, role: ComponentRole, id: ComponentId, enabled: bool) -> Result<()> {
        let table = self.table(role);
        if !table.contains(id) {
            return Err(Error::UnknownComponent { role, id });
        }
        let previous = table.enabled[id as usize].swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            debug!(%role, id, enabled, "component availability changed");
            self.epoch.bump();
        }
        Ok(())
    }

    pub fn set_panner_enabled(&self, id: ComponentId, enabled: bool) -> Result<()> {
        self.set_enabled(ComponentRole::Panner, id, enabled)
    }

    pub fn set_attenuator_enabled(&self, id: ComponentId, enabled: bool) -> Result<()> {
        self.set_enabled(ComponentRole::Attenuator, id, enabled)
    }

    /// The component new spatializers prefer.
    pub fn default_id(&self, role: ComponentRole) -> Option<ComponentId> {
        Some(self.table(role).default.load(Ordering::Acquire)).filter(|&id| id != NONE)
    }

    pub fn set_default(&self, role: ComponentRole, id: ComponentId) -> Result<()> {
        let table = self.table(role);
        if !table.contains(id) {
            return Err(Error::UnknownComponent { role, id });
        }
        table.default.store(id, Ordering::Release);
        Ok(())
    }

    /// `preferred` if it is enabled, otherwise the lowest-ID enabled component.
    /// Lock-free.
    pub fn resolve(&self, role: ComponentRole, preferred: Option<ComponentId>) -> Option<ComponentId> {
        let table = self.table(role);
        if let Some(id) = preferred.filter(|&id| table.is_enabled(id)) {
            return Some(id);
        }
        (0..table.count.load(Ordering::Acquire)).find(|&id| table.is_enabled(id))
    }

    /// Build a component for one spatializer.
    pub fn create(&self, role: ComponentRole, id: ComponentId, ctx: &ComponentContext<'_>) -> Result<Box<dyn AudioNode>> {
        let table = self.table(role);
        let factory = table
            .entries
            .read()
            .get(id as usize)
            .map(|e| e.factory.clone())
            .ok_or(Error::UnknownComponent { role, id })?;
        if !table.is_enabled(id) {
            return Err(Error::ComponentDisabled { role, id });
        }
        factory(ctx)
    }

    /// Enable a panner/attenuator pair, optionally disabling the current defaults and
    /// making the pair the new defaults.
    pub fn set_spatialization(
        &self,
        panner: ComponentId,
        attenuator: ComponentId,
        disable_previous: bool,
        set_default: bool,
    ) -> Result<()> {
        for (role, id) in [(ComponentRole::Panner, panner), (ComponentRole::Attenuator, attenuator)] {
            if !self.contains(role, id) {
                return Err(Error::UnknownComponent { role, id });
            }
        }
        for (role, id) in [(ComponentRole::Panner, panner), (ComponentRole::Attenuator, attenuator)] {
            let previous = self.default_id(role);
            self.set_enabled(role, id, true)?;
            if disable_previous {
                if let Some(previous) = previous.filter(|&p| p != id) {
                    self.set_enabled(role, previous, false)?;
                }
            }
            if set_default {
                self.set_default(role, id)?;
            }
        }
        Ok(())
    }

    /// Switch every spatializer between the basic components and the binaural panner with
    /// inverse-distance attenuation.
    pub fn set_global_hrtf(&self, enabled: bool) -> Result<()> {
        if enabled == self.global_hrtf() {
            return Ok(());
        }
        let (panner, attenuator) = if enabled {
            (builtin::BINAURAL_PANNER, builtin::INVERSE_DISTANCE_ATTENUATOR)
        } else {
            (builtin::BASIC_PANNER, builtin::BASIC_ATTENUATOR)
        };
        self.set_spatialization(panner, attenuator, true, true)
    }

    /// Whether both binaural built-ins are enabled.
    pub fn global_hrtf(&self) -> bool {
        self.is_enabled(ComponentRole::Panner, builtin::BINAURAL_PANNER)
            && self.is_enabled(ComponentRole::Attenuator, builtin::INVERSE_DISTANCE_ATTENUATOR)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |table: &RoleTable| -> Vec<(&'static str, bool)> {
            table
                .entries
                .read()
                .iter()
                .enumerate()
                .map(|(id, e)| (e.name, table.is_enabled(id as ComponentId)))
                .collect()
        };
        f.debug_struct("ComponentRegistry")
            .field("panners", &names(&self.panners))
            .field("attenuators", &names(&self.attenuators))
            .field("epoch", &self.epoch.current())
            .finish()
    }
}
