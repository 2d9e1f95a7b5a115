//! meshlight Node - model instance table and dispatch
//!
//! A [`Node`] owns every model server of one mesh node plus the
//! collaborators they share (timers, NVM, outbound and event buffers).
//! All entry points are synchronous: the host feeds messages, timer
//! expiries and clock ticks one at a time and drains the buffers after.

use std::collections::HashMap;

use meshlight_core::{
    AppKeyIndex, BoundState, Delay, ElementId, MeshAddress, MeshError, MeshResult, ModelEvent,
    ModelKind, ScheduleAction, TransitionParams, UpdateSource,
};
use meshlight_models::{
    Change, DefaultTransitionServer, HslServer, LevelServer, LightnessServer, ModelCtx, ModelServer,
    OnOffServer, PowerLevelServer, PowerOnOffServer, PublishState, SceneRequest, SceneServer,
    SchedulerServer, TimeServer, CLOCK_PERIOD_MS,
};
use meshlight_state::{
    to_hsl_lightness, to_hue, to_level, to_lightness_actual, to_onoff, to_power_actual,
    to_saturation, AckContext, BindingGraph, BindingGraphBuilder, BindingKey, Nvm, Translate,
};
use meshlight_time::{TimerId, TimerService, TimerSlot, VirtualTimers};
use meshlight_wire::{
    HslValue, InboundMessage, ModelMessage, OnPowerUp, OutboundMessage, ScheduleEntry, TimeState,
};
use tracing::{debug, info, trace};

use crate::{NodeConfig, NodeError, NodeResult, PublishConfig};

/// Receiver of drained model events
pub trait EventSink {
    fn deliver(&mut self, event: ModelEvent);
}

impl EventSink for Vec<ModelEvent> {
    fn deliver(&mut self, event: ModelEvent) {
        self.push(event);
    }
}

/// Node counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub messages_in: u64,
    /// Undecodable or unroutable messages
    pub messages_dropped: u64,
    pub timers_fired: u64,
    pub clock_ticks: u64,
    pub cascades: u64,
    /// Bound states written by cascades
    pub bound_updates: u64,
    pub schedules_fired: u64,
}

/// Collaborators and buffers every model borrows through [`ModelCtx`]
struct Io<T, N> {
    timers: T,
    nvm: N,
    outbox: Vec<OutboundMessage>,
    events: Vec<ModelEvent>,
    now_ms: u64,
}

impl<T: TimerService, N: Nvm> Io<T, N> {
    fn ctx(&mut self, default_transition: TransitionParams) -> ModelCtx<'_> {
        ModelCtx {
            timers: &mut self.timers,
            nvm: &mut self.nvm,
            outbox: &mut self.outbox,
            events: &mut self.events,
            now_ms: self.now_ms,
            default_transition,
        }
    }
}

macro_rules! server_accessor {
    ($(#[$doc:meta])* $name:ident, $kind:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self, element: ElementId) -> Option<&$ty> {
            match self.model(element, ModelKind::$kind)? {
                ModelServer::$variant(server) => Some(server),
                _ => None,
            }
        }
    };
}

/// One mesh node's model state engine
pub struct Node<T, N> {
    config: NodeConfig,
    io: Io<T, N>,
    servers: Vec<ModelServer>,
    /// `(element, kind)` -> server; HSL answers for three elements
    routes: HashMap<(ElementId, ModelKind), usize>,
    /// Bound state -> owning server
    bindings: HashMap<BindingKey, usize>,
    /// Element -> scene server covering it; HSL sub-elements map to their owner's
    scenes: HashMap<ElementId, usize>,
    graph: BindingGraph,
    stats: NodeStats,
}

impl<T: TimerService, N: Nvm> Node<T, N> {
    /// Build a node from a configuration. States start at their defaults;
    /// call [`Node::power_up`] to apply persisted values.
    pub fn new(config: NodeConfig, timers: T, nvm: N) -> MeshResult<Self> {
        config.validate()?;

        let mut servers = build_servers(&config);
        let mut routes = HashMap::new();
        let mut bindings = HashMap::new();
        let mut scenes = HashMap::new();

        for (index, server) in servers.iter().enumerate() {
            for address in server.addresses() {
                routes.insert(address, index);
            }
            for key in server.bound_states() {
                bindings.insert(key, index);
            }
            if let ModelServer::Scene(scene) = server {
                scenes.insert(scene.element(), index);
            }
        }
        for server in &servers {
            if let ModelServer::Hsl(hsl) = server {
                if let Some(&scene) = scenes.get(&hsl.element()) {
                    scenes.entry(hsl.hue_element()).or_insert(scene);
                    scenes.entry(hsl.saturation_element()).or_insert(scene);
                }
            }
        }

        for (index, element) in config.elements.iter().enumerate() {
            for publish in &element.publish {
                let Some(&server) = routes.get(&(ElementId(index as u8), publish.model)) else {
                    continue;
                };
                *publish_slot(&mut servers[server], publish.model) = publish_state(publish);
            }
        }

        let graph = derive_bindings(&config, &bindings)?;

        info!(
            elements = config.elements.len(),
            models = servers.len(),
            bindings = graph.edge_count(),
            "node configured"
        );

        Ok(Node {
            config,
            io: Io {
                timers,
                nvm,
                outbox: Vec::new(),
                events: Vec::new(),
                now_ms: 0,
            },
            servers,
            routes,
            bindings,
            scenes,
            graph,
            stats: NodeStats::default(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn graph(&self) -> &BindingGraph {
        &self.graph
    }

    pub fn timers(&self) -> &T {
        &self.io.timers
    }

    pub fn nvm(&self) -> &N {
        &self.io.nvm
    }

    /// Node monotonic time
    pub fn now_ms(&self) -> u64 {
        self.io.now_ms
    }

    /// Move the node clock forward; hosts with a real timer service call
    /// this before each input
    pub fn set_now(&mut self, now_ms: u64) {
        self.io.now_ms = self.io.now_ms.max(now_ms);
    }

    /// Model instance answering for `(element, kind)`
    pub fn model(&self, element: ElementId, kind: ModelKind) -> Option<&ModelServer> {
        self.routes.get(&(element, kind)).map(|&index| &self.servers[index])
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelServer> {
        self.servers.iter()
    }

    server_accessor!(onoff, GenOnOff, OnOff, OnOffServer);
    server_accessor!(level, GenLevel, Level, LevelServer);
    server_accessor!(default_transition_server, GenDefaultTransitionTime, DefaultTransition, DefaultTransitionServer);
    server_accessor!(power_onoff, GenPowerOnOff, PowerOnOff, PowerOnOffServer);
    server_accessor!(power_level, GenPowerLevel, PowerLevel, PowerLevelServer);
    server_accessor!(lightness, LightLightness, Lightness, LightnessServer);
    server_accessor!(
        /// HSL server owning `element` (pass the main element)
        hsl, LightHsl, Hsl, HslServer
    );
    server_accessor!(scene, Scene, Scene, SceneServer);
    server_accessor!(scheduler, Scheduler, Scheduler, SchedulerServer);
    server_accessor!(time, Time, Time, TimeServer);

    /// Take every buffered outbound message
    pub fn drain_outbox(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.io.outbox)
    }

    /// Take every buffered event
    pub fn drain_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.io.events)
    }

    /// Deliver buffered events to `sink`; returns how many were delivered
    pub fn flush_events(&mut self, sink: &mut dyn EventSink) -> usize {
        let events = self.drain_events();
        let count = events.len();
        for event in events {
            sink.deliver(event);
        }
        count
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Decode, route and handle one inbound access message
    pub fn handle_message(&mut self, msg: &InboundMessage) {
        self.stats.messages_in += 1;

        let decoded = match ModelMessage::decode(msg.opcode, &msg.params) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.messages_dropped += 1;
                debug!(opcode = ?msg.opcode, src = %msg.src, %err, "dropping message");
                return;
            }
        };

        let kind = decoded.target_model();
        let Some(&index) = self.routes.get(&(msg.element, kind)) else {
            self.stats.messages_dropped += 1;
            debug!(element = %msg.element, ?kind, "no model for message");
            return;
        };

        let ack = AckContext {
            src: msg.src,
            app_key_index: msg.app_key_index,
            for_unicast: msg.is_unicast(),
        };
        let default_transition = self.default_transition(self.servers[index].element());
        let handled = self.servers[index].handle(&mut self.io.ctx(default_transition), ack, &decoded);

        for change in handled.changes {
            self.propagate(change);
        }
        if let Some(request) = handled.scene {
            self.fan_out_scene(index, request);
        }
    }

    /// A timer armed through the node's timer service expired
    pub fn on_timer(&mut self, id: TimerId) {
        self.stats.timers_fired += 1;
        if id.slot == TimerSlot::Clock {
            self.tick_clock(CLOCK_PERIOD_MS);
            return;
        }

        let Some(&index) = self.routes.get(&(id.element, id.model)) else {
            debug!(?id, "timer without a model");
            return;
        };
        let default_transition = self.default_transition(self.servers[index].element());
        if let Some(change) = self.servers[index].on_timer(&mut self.io.ctx(default_transition), id) {
            self.propagate(change);
        }
        if let Some(&scene) = self.scenes.get(&id.element) {
            self.settle_recall(scene);
        }
    }

    /// Advance the Time server's clock and run due scheduler entries.
    ///
    /// Schedulers are evaluated once, at the local time reached, however
    /// many seconds `elapsed_ms` spans.
    pub fn tick_clock(&mut self, elapsed_ms: u32) {
        self.stats.clock_ticks += 1;

        let Some(time) = self.servers.iter_mut().find_map(|server| match server {
            ModelServer::Time(time) => Some(time),
            _ => None,
        }) else {
            return;
        };
        if time.advance(elapsed_ms) == 0 {
            return;
        }
        let Some(local) = time.local_datetime() else {
            return;
        };
        trace!(%local, "clock");

        let schedulers: Vec<usize> = self
            .servers
            .iter()
            .enumerate()
            .filter(|(_, server)| matches!(server, ModelServer::Scheduler(_)))
            .map(|(index, _)| index)
            .collect();

        for server in schedulers {
            let due = match &mut self.servers[server] {
                ModelServer::Scheduler(scheduler) => scheduler.evaluate(local),
                _ => continue,
            };
            for index in due {
                self.fire_schedule(server, index);
            }
        }
    }

    /// Apply persisted state after boot.
    ///
    /// Settings and registers are restored first. Then, element by element,
    /// the OnPowerUp mode picks the boot value of the state at the root of the
    /// element's bindings (Lightness, else Power Level, else OnOff) and the
    /// result cascades like any other change. Elements without a Power OnOff
    /// server restore their last state.
    pub fn power_up(&mut self) {
        for server in &mut self.servers {
            let mut ctx = self.io.ctx(TransitionParams::IMMEDIATE);
            match server {
                ModelServer::DefaultTransition(s) => s.restore(&mut ctx),
                ModelServer::PowerOnOff(s) => s.restore(&mut ctx),
                ModelServer::Scene(s) => s.restore(&mut ctx),
                ModelServer::Scheduler(s) => s.restore(&mut ctx),
                ModelServer::Time(s) => s.restore(&mut ctx),
                _ => {}
            }
        }

        for index in 0..self.config.elements.len() {
            self.power_up_element(ElementId(index as u8));
        }
        info!(models = self.servers.len(), "power up complete");
    }

    fn power_up_element(&mut self, element: ElementId) {
        let mode = match self.model(element, ModelKind::GenPowerOnOff) {
            Some(ModelServer::PowerOnOff(s)) => s.on_power_up(),
            _ => OnPowerUp::Restore,
        };
        let find = |kind: ModelKind| self.routes.get(&(element, kind)).copied();
        let onoff = find(ModelKind::GenOnOff);
        let level = find(ModelKind::GenLevel);
        let actual = find(ModelKind::LightLightness).or(find(ModelKind::GenPowerLevel));
        let hsl = find(ModelKind::LightHsl);
        let follows_hsl = self.is_hsl_sub_element(element);

        let mut ctx = self.io.ctx(TransitionParams::IMMEDIATE);
        let servers = &mut self.servers;
        let mut changes = Vec::new();

        if let Some(index) = actual {
            match &mut servers[index] {
                ModelServer::Lightness(s) => {
                    let restored = s.restore(&mut ctx);
                    changes.push(s.power_up(&mut ctx, mode, restored));
                }
                ModelServer::PowerLevel(s) => {
                    let restored = s.restore(&mut ctx);
                    changes.push(s.power_up(&mut ctx, mode, restored));
                }
                _ => {}
            }
            for index in [onoff, level].into_iter().flatten() {
                restore_scenes(&mut servers[index], &mut ctx);
            }
        } else if let Some(index) = onoff {
            if let ModelServer::OnOff(s) = &mut servers[index] {
                let restored = s.restore(&mut ctx);
                let on = match mode {
                    OnPowerUp::Off => false,
                    OnPowerUp::Default => true,
                    OnPowerUp::Restore => restored.unwrap_or(false),
                };
                changes.push(s.power_up(&mut ctx, on));
            }
            if let Some(index) = level {
                restore_scenes(&mut servers[index], &mut ctx);
            }
        } else if let Some(index) = level {
            if let ModelServer::Level(s) = &mut servers[index] {
                let restored = s.restore(&mut ctx);
                if !follows_hsl {
                    let value = match mode {
                        OnPowerUp::Restore => restored.unwrap_or(0),
                        OnPowerUp::Off | OnPowerUp::Default => 0,
                    };
                    changes.push(s.power_up(&mut ctx, value));
                }
            }
        }

        if let Some(index) = hsl {
            if let ModelServer::Hsl(s) = &mut servers[index] {
                let restored = s.restore(&mut ctx);
                changes.extend(s.power_up(&mut ctx, mode, restored));
            }
        }

        for change in changes {
            self.propagate(change);
        }
    }

    // ------------------------------------------------------------------
    // Local API
    // ------------------------------------------------------------------

    /// Application write to Generic OnOff. `None` uses the element's
    /// Default Transition Time.
    pub fn set_onoff(&mut self, element: ElementId, on: bool, transition: Option<TransitionParams>) -> NodeResult<()> {
        self.local_write(element, ModelKind::GenOnOff, |server, ctx| match server {
            ModelServer::OnOff(s) => {
                let params = ctx.resolve(transition);
                Some(vec![s.set(ctx, on, params, UpdateSource::Local)])
            }
            _ => None,
        })
    }

    pub fn set_level(&mut self, element: ElementId, level: i16, transition: Option<TransitionParams>) -> NodeResult<()> {
        self.local_write(element, ModelKind::GenLevel, |server, ctx| match server {
            ModelServer::Level(s) => {
                let params = ctx.resolve(transition);
                Some(vec![s.set(ctx, level, params, UpdateSource::Local)])
            }
            _ => None,
        })
    }

    pub fn set_power(&mut self, element: ElementId, power: u16, transition: Option<TransitionParams>) -> NodeResult<()> {
        self.local_write(element, ModelKind::GenPowerLevel, |server, ctx| match server {
            ModelServer::PowerLevel(s) => {
                let params = ctx.resolve(transition);
                Some(vec![s.set(ctx, power, params, UpdateSource::Local)])
            }
            _ => None,
        })
    }

    pub fn set_lightness(&mut self, element: ElementId, lightness: u16, transition: Option<TransitionParams>) -> NodeResult<()> {
        self.local_write(element, ModelKind::LightLightness, |server, ctx| match server {
            ModelServer::Lightness(s) => {
                let params = ctx.resolve(transition);
                Some(vec![s.set(ctx, lightness, params, UpdateSource::Local)])
            }
            _ => None,
        })
    }

    pub fn set_hsl(&mut self, element: ElementId, value: HslValue, transition: Option<TransitionParams>) -> NodeResult<()> {
        self.local_write(element, ModelKind::LightHsl, |server, ctx| match server {
            ModelServer::Hsl(s) => {
                let params = ctx.resolve(transition);
                Some(s.set(ctx, value, params, UpdateSource::Local))
            }
            _ => None,
        })
    }

    /// Store the present state of `element` as `scene`
    pub fn store_scene(&mut self, element: ElementId, scene: u16) -> NodeResult<()> {
        reject_scene_zero(scene)?;
        let index = self.route(element, ModelKind::Scene)?;
        let slot = match &mut self.servers[index] {
            ModelServer::Scene(s) => s.store(&mut self.io.ctx(TransitionParams::IMMEDIATE), scene)?,
            _ => return Err(no_model(element, ModelKind::Scene)),
        };
        self.fan_out_scene(index, SceneRequest::Store { slot });
        Ok(())
    }

    /// Recall `scene` on `element`
    pub fn recall_scene(&mut self, element: ElementId, scene: u16, transition: Option<TransitionParams>) -> NodeResult<()> {
        reject_scene_zero(scene)?;
        let index = self.route(element, ModelKind::Scene)?;
        let default_transition = self.default_transition(element);
        let mut ctx = self.io.ctx(default_transition);
        let params = ctx.resolve(transition);
        let slot = match &mut self.servers[index] {
            ModelServer::Scene(s) => s.recall(&mut ctx, scene, params)?,
            _ => return Err(no_model(element, ModelKind::Scene)),
        };
        self.fan_out_scene(index, SceneRequest::Recall { slot, params });
        Ok(())
    }

    /// Remove `scene` from the register; true when it was present
    pub fn delete_scene(&mut self, element: ElementId, scene: u16) -> NodeResult<bool> {
        reject_scene_zero(scene)?;
        let index = self.route(element, ModelKind::Scene)?;
        match &mut self.servers[index] {
            ModelServer::Scene(s) => Ok(s.delete(&mut self.io.ctx(TransitionParams::IMMEDIATE), scene)),
            _ => Err(no_model(element, ModelKind::Scene)),
        }
    }

    /// Write a scheduler register entry; false when the entry was rejected
    pub fn set_schedule(&mut self, element: ElementId, entry: ScheduleEntry) -> NodeResult<bool> {
        let index = self.route(element, ModelKind::Scheduler)?;
        match &mut self.servers[index] {
            ModelServer::Scheduler(s) => Ok(s.set_entry(&mut self.io.ctx(TransitionParams::IMMEDIATE), entry)),
            _ => Err(no_model(element, ModelKind::Scheduler)),
        }
    }

    /// Fire scheduler entry `index` now. An index with no stored action is a
    /// no-op returning `None`.
    pub fn trigger_schedule(&mut self, element: ElementId, index: u8) -> NodeResult<Option<ScheduleEntry>> {
        let server = self.route(element, ModelKind::Scheduler)?;
        Ok(self.fire_schedule(server, index))
    }

    /// Clear scheduler entry `index`; true when something was cleared
    pub fn clear_schedule(&mut self, element: ElementId, index: u8) -> NodeResult<bool> {
        let server = self.route(element, ModelKind::Scheduler)?;
        match &mut self.servers[server] {
            ModelServer::Scheduler(s) => Ok(s.clear_event(&mut self.io.ctx(TransitionParams::IMMEDIATE), index)),
            _ => Err(no_model(element, ModelKind::Scheduler)),
        }
    }

    /// Set the Time server's clock
    pub fn set_time(&mut self, element: ElementId, state: TimeState) -> NodeResult<()> {
        let index = self.route(element, ModelKind::Time)?;
        match &mut self.servers[index] {
            ModelServer::Time(s) => {
                s.set_time(&mut self.io.ctx(TransitionParams::IMMEDIATE), state);
                Ok(())
            }
            _ => Err(no_model(element, ModelKind::Time)),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn route(&self, element: ElementId, kind: ModelKind) -> NodeResult<usize> {
        self.routes
            .get(&(element, kind))
            .copied()
            .ok_or_else(|| no_model(element, kind))
    }

    fn default_transition(&self, element: ElementId) -> TransitionParams {
        match self.model(element, ModelKind::GenDefaultTransitionTime) {
            Some(ModelServer::DefaultTransition(s)) => s.params(),
            _ => TransitionParams::IMMEDIATE,
        }
    }

    fn is_hsl_sub_element(&self, element: ElementId) -> bool {
        self.servers.iter().any(|server| match server {
            ModelServer::Hsl(hsl) => hsl.hue_element() == element || hsl.saturation_element() == element,
            _ => false,
        })
    }

    fn local_write<F>(&mut self, element: ElementId, kind: ModelKind, write: F) -> NodeResult<()>
    where
        F: FnOnce(&mut ModelServer, &mut ModelCtx<'_>) -> Option<Vec<Change>>,
    {
        let index = self.route(element, kind)?;
        let default_transition = self.default_transition(self.servers[index].element());
        let changes = write(&mut self.servers[index], &mut self.io.ctx(default_transition))
            .ok_or_else(|| no_model(element, kind))?;
        for change in changes {
            self.propagate(change);
        }
        Ok(())
    }

    /// Cascade one change through the binding graph
    fn propagate(&mut self, change: Change) {
        let Change {
            key,
            value,
            params,
            source,
        } = change;
        let mut touched = vec![key.element];

        let updated = self.graph.cascade(key, value, |target, bound| {
            let index = self.bindings.get(&target).copied();
            debug_assert!(index.is_some(), "binding endpoint {:?} has no model", target);
            let index = index?;
            touched.push(target.element);
            self.servers[index].apply_binding(&mut self.io.ctx(params), bound, params)
        });

        self.stats.cascades += 1;
        self.stats.bound_updates += updated as u64;
        trace!(origin = ?key, updated, ?source, "cascade");

        if matches!(source, UpdateSource::SceneRecall | UpdateSource::PowerUp) {
            return;
        }
        touched.sort();
        touched.dedup();
        for element in touched {
            if let Some(&index) = self.scenes.get(&element) {
                if let ModelServer::Scene(scene) = &mut self.servers[index] {
                    scene.invalidate();
                }
            }
        }
    }

    /// Run a scene store or recall on every scene-capable model the scene
    /// server covers
    fn fan_out_scene(&mut self, scene: usize, request: SceneRequest) {
        let members = self.scene_members(scene);
        debug!(?request, models = members.len(), "scene fan-out");
        for index in members {
            let default_transition = self.default_transition(self.servers[index].element());
            let mut ctx = self.io.ctx(default_transition);
            match request {
                SceneRequest::Store { slot } => self.servers[index].store_scene(&mut ctx, slot),
                SceneRequest::Recall { slot, params } => {
                    self.servers[index].recall_scene(&mut ctx, slot, params)
                }
            }
        }
        if matches!(request, SceneRequest::Recall { .. }) {
            self.settle_recall(scene);
        }
    }

    /// Scene-capable models covered by scene server `scene`
    fn scene_members(&self, scene: usize) -> Vec<usize> {
        self.servers
            .iter()
            .enumerate()
            .filter(|(_, server)| {
                server.is_scene_capable() && self.scenes.get(&server.element()) == Some(&scene)
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Mark a pending recall complete once none of its models is transitioning
    fn settle_recall(&mut self, scene: usize) {
        let pending = match &self.servers[scene] {
            ModelServer::Scene(s) => s.register().target() != 0,
            _ => false,
        };
        if !pending {
            return;
        }
        let busy = self
            .scene_members(scene)
            .into_iter()
            .any(|index| self.servers[index].is_transitioning());
        if busy {
            return;
        }
        if let ModelServer::Scene(s) = &mut self.servers[scene] {
            s.finish_recall(&mut self.io.ctx(TransitionParams::IMMEDIATE));
        }
    }

    fn fire_schedule(&mut self, server: usize, index: u8) -> Option<ScheduleEntry> {
        let element = self.servers[server].element();
        let entry = match &mut self.servers[server] {
            ModelServer::Scheduler(s) => s.trigger(&mut self.io.ctx(TransitionParams::IMMEDIATE), index)?,
            _ => return None,
        };
        self.stats.schedules_fired += 1;

        let params = TransitionParams::new(entry.transition, Delay(0));
        let result = match entry.action {
            ScheduleAction::TurnOn | ScheduleAction::TurnOff => {
                let on = entry.action == ScheduleAction::TurnOn;
                self.local_write(element, ModelKind::GenOnOff, |server, ctx| match server {
                    ModelServer::OnOff(s) => Some(vec![s.set(ctx, on, params, UpdateSource::Scheduler)]),
                    _ => None,
                })
            }
            ScheduleAction::SceneRecall => self.recall_scene(element, entry.scene, Some(params)),
            ScheduleAction::NoAction => Ok(()),
        };
        if let Err(err) = result {
            debug!(%element, index, %err, "scheduled action not applied");
        }
        Some(entry)
    }
}

impl<N: Nvm> Node<VirtualTimers, N> {
    /// Node on a deterministic virtual timer wheel sized from the config
    pub fn with_virtual_timers(config: NodeConfig, nvm: N) -> MeshResult<Self> {
        let timers = match config.timer_capacity {
            Some(capacity) => VirtualTimers::with_capacity(capacity),
            None => VirtualTimers::new(),
        };
        Node::new(config, timers, nvm)
    }

    /// Deliver every expiry due up to `until_ms` in deadline order, moving
    /// virtual time along; returns the number of expiries
    pub fn run_until(&mut self, until_ms: u64) -> usize {
        let mut fired = 0;
        while let Some(id) = self.io.timers.pop_due(until_ms) {
            self.io.now_ms = self.io.timers.now_ms();
            self.on_timer(id);
            fired += 1;
        }
        self.io.now_ms = self.io.timers.now_ms();
        fired
    }

    /// Run for `ms` of virtual time
    pub fn advance(&mut self, ms: u64) -> usize {
        self.run_until(self.io.now_ms + ms)
    }
}

fn no_model(element: ElementId, kind: ModelKind) -> NodeError {
    MeshError::NoSuchModel { element, kind }.into()
}

fn reject_scene_zero(scene: u16) -> NodeResult<()> {
    if scene == 0 {
        return Err(MeshError::ProhibitedValue("scene number 0").into());
    }
    Ok(())
}

/// Restore a server whose present value follows a binding
fn restore_scenes(server: &mut ModelServer, ctx: &mut ModelCtx<'_>) {
    match server {
        ModelServer::OnOff(s) => {
            s.restore(ctx);
        }
        ModelServer::Level(s) => {
            s.restore(ctx);
        }
        _ => {}
    }
}

fn build_servers(config: &NodeConfig) -> Vec<ModelServer> {
    let scenes = config.scene_capacity;
    let window = config.transaction_window_ms;
    let mut servers = Vec::new();

    for (index, element_config) in config.elements.iter().enumerate() {
        let element = ElementId(index as u8);
        for kind in &element_config.models {
            let server = match kind {
                ModelKind::GenOnOff => ModelServer::OnOff(OnOffServer::new(element, scenes, window)),
                ModelKind::GenLevel => ModelServer::Level(LevelServer::new(element, scenes, window)),
                ModelKind::GenDefaultTransitionTime => {
                    ModelServer::DefaultTransition(DefaultTransitionServer::new(element))
                }
                ModelKind::GenPowerOnOff => ModelServer::PowerOnOff(PowerOnOffServer::new(element)),
                ModelKind::GenPowerLevel => {
                    ModelServer::PowerLevel(PowerLevelServer::new(element, scenes, window))
                }
                ModelKind::LightLightness => {
                    ModelServer::Lightness(LightnessServer::new(element, scenes, window))
                }
                ModelKind::LightHsl => ModelServer::Hsl(HslServer::new(element, scenes, window)),
                // Served by the HSL server of the owning element
                ModelKind::LightHslHue | ModelKind::LightHslSaturation => continue,
                ModelKind::Scene => ModelServer::Scene(SceneServer::new(element, scenes, window)),
                ModelKind::Scheduler => ModelServer::Scheduler(SchedulerServer::new(
                    element,
                    config.scheduler_seed.wrapping_add(index as u64),
                )),
                ModelKind::Time => ModelServer::Time(TimeServer::new(element)),
            };
            servers.push(server);
        }
    }
    servers
}

fn publish_slot(server: &mut ModelServer, kind: ModelKind) -> &mut PublishState {
    match (server, kind) {
        (ModelServer::Hsl(hsl), ModelKind::LightHslHue) => &mut hsl.hue_publish,
        (ModelServer::Hsl(hsl), ModelKind::LightHslSaturation) => &mut hsl.saturation_publish,
        (server, _) => server.publish_mut(),
    }
}

fn publish_state(config: &PublishConfig) -> PublishState {
    PublishState::new(
        MeshAddress(config.address),
        AppKeyIndex(config.app_key_index),
        config.ttl,
        config.min_interval_ms,
    )
}

/// Standard bindings implied by the element table
fn derive_bindings(config: &NodeConfig, hosted: &HashMap<BindingKey, usize>) -> MeshResult<BindingGraph> {
    let mut builder = BindingGraphBuilder::new();
    let mut keys: Vec<BindingKey> = hosted.keys().copied().collect();
    keys.sort();
    for key in keys {
        builder.node(key);
    }

    for (index, element_config) in config.elements.iter().enumerate() {
        let element = ElementId(index as u8);
        let key = |state| BindingKey::new(element, state);
        let onoff = element_config.has(ModelKind::GenOnOff).then(|| key(BoundState::OnOff));
        let level = element_config.has(ModelKind::GenLevel).then(|| key(BoundState::Level));

        let actual: Option<(BindingKey, Translate)> = if element_config.has(ModelKind::LightLightness) {
            Some((key(BoundState::LightnessActual), to_lightness_actual as Translate))
        } else if element_config.has(ModelKind::GenPowerLevel) {
            Some((key(BoundState::PowerActual), to_power_actual as Translate))
        } else {
            None
        };

        match actual {
            Some((actual, into_actual)) => {
                if let Some(onoff) = onoff {
                    builder.bidirectional(onoff, actual, into_actual, to_onoff);
                }
                if let Some(level) = level {
                    builder.bidirectional(level, actual, into_actual, to_level);
                }
            }
            None => {
                if let (Some(onoff), Some(level)) = (onoff, level) {
                    builder.edge(onoff, level, to_level);
                }
            }
        }

        if element_config.has(ModelKind::LightHsl) {
            builder.bidirectional(
                key(BoundState::LightnessActual),
                key(BoundState::HslLightness),
                to_hsl_lightness,
                to_lightness_actual,
            );
            let parts: [(usize, BoundState, Translate); 2] =
                [
                (1, BoundState::HslHue, to_hue as Translate),
                (2, BoundState::HslSaturation, to_saturation as Translate),
            ];
            for (offset, state, from_level) in parts {
                let has_level = config
                    .elements
                    .get(index + offset)
                    .is_some_and(|sub| sub.has(ModelKind::GenLevel));
                if has_level {
                    let sub = ElementId((index + offset) as u8);
                    builder.bidirectional(
                        BindingKey::new(sub, state),
                        BindingKey::new(sub, BoundState::Level),
                        to_level,
                        from_level,
                    );
                }
            }
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use meshlight_core::TransitionTime;
    use meshlight_state::MemoryNvm;
    use meshlight_time::{tai_for_local, TAI_UTC_DELTA_ZERO, TIME_ZONE_ZERO};
    use meshlight_wire::{
        Opcode, GEN_LEVEL_SET, GEN_ONOFF_SET, GEN_ONOFF_STATUS, LIGHT_LIGHTNESS_SET, SCENE_RECALL,
        SCENE_STORE,
    };

    const E0: ElementId = ElementId(0);

    fn node(config: NodeConfig) -> Node<VirtualTimers, MemoryNvm> {
        node_with(config, MemoryNvm::new())
    }

    fn node_with(config: NodeConfig, nvm: MemoryNvm) -> Node<VirtualTimers, MemoryNvm> {
        let mut node = Node::with_virtual_timers(config, nvm).unwrap();
        node.power_up();
        node.drain_events();
        node
    }

    fn message(opcode: Opcode, params: Vec<u8>) -> InboundMessage {
        InboundMessage::new(opcode, MeshAddress(0x0001), E0, params).with_dst(MeshAddress(0x0100))
    }

    fn transition(steps_100ms: u8) -> TransitionParams {
        TransitionParams::new(TransitionTime::new(steps_100ms, 0), Delay(0))
    }

    fn lightness(node: &Node<VirtualTimers, MemoryNvm>) -> u16 {
        node.lightness(E0).unwrap().model().present()
    }

    fn onoff(node: &Node<VirtualTimers, MemoryNvm>) -> bool {
        node.onoff(E0).unwrap().model().present()
    }

    fn level(node: &Node<VirtualTimers, MemoryNvm>, element: ElementId) -> i16 {
        node.level(element).unwrap().model().present()
    }

    #[test]
    fn test_derived_bindings() {
        let node = node(NodeConfig::hsl_light());
        // OnOff<->Lightness, Level<->Lightness, Lightness<->HSL L, Hue<->Level, Sat<->Level
        assert_eq!(node.graph().edge_count(), 10);
        assert!(node.model(ElementId(1), ModelKind::LightHslHue).is_some());
        assert!(node.model(ElementId(2), ModelKind::LightHslSaturation).is_some());
    }

    #[test]
    fn test_onoff_set_cascades_to_lightness_and_level() {
        let mut node = node(NodeConfig::dimmable_light());
        let before = node.stats().bound_updates;
        node.handle_message(&message(GEN_ONOFF_SET, vec![1, 1]));

        assert!(onoff(&node));
        // Default 0 and Last 0xFFFF after boot
        assert_eq!(lightness(&node), 0xFFFF);
        assert_eq!(level(&node, E0), i16::MAX);
        assert_eq!(node.stats().bound_updates - before, 2);
        assert!(!node.drain_outbox().is_empty());
    }

    #[test]
    fn test_level_set_cascades_to_onoff() {
        let mut node = node(NodeConfig::dimmable_light());
        let value = (-32768i16 + 0x1000).to_le_bytes();
        node.handle_message(&message(GEN_LEVEL_SET, vec![value[0], value[1], 7]));

        assert_eq!(lightness(&node), 0x1000);
        assert!(onoff(&node));
    }

    #[test]
    fn test_lightness_transition_carries_to_bound_states() {
        let mut node = node(NodeConfig::dimmable_light());
        node.set_lightness(E0, 0x8000, Some(transition(10))).unwrap();
        assert!(node.lightness(E0).unwrap().model().is_active());
        assert!(node.level(E0).unwrap().model().is_active());

        node.advance(1_000);
        assert_eq!(lightness(&node), 0x8000);
        assert_eq!(level(&node, E0), 0);
        assert!(onoff(&node));
        assert_eq!(node.timers().armed_count(), 0);
    }

    #[test]
    fn test_duplicate_set_is_ignored() {
        let mut node = node(NodeConfig::dimmable_light());
        let set = message(LIGHT_LIGHTNESS_SET, vec![0x00, 0x40, 9]);
        node.handle_message(&set);
        let updates = node.stats().bound_updates;
        node.handle_message(&set);

        assert_eq!(lightness(&node), 0x4000);
        assert_eq!(node.stats().bound_updates, updates);
    }

    #[test]
    fn test_undecodable_and_unroutable_messages() {
        let mut node = node(NodeConfig::default());
        node.handle_message(&message(GEN_ONOFF_SET, vec![2, 1]));
        node.handle_message(&message(LIGHT_LIGHTNESS_SET, vec![0x00, 0x40, 1]));
        assert_eq!(node.stats().messages_dropped, 2);
        assert!(node.drain_outbox().is_empty());
    }

    #[test]
    fn test_scene_store_and_recall_through_messages() {
        let mut node = node(NodeConfig::dimmable_light());
        node.set_lightness(E0, 0x2000, None).unwrap();
        node.handle_message(&message(SCENE_STORE, vec![0x05, 0x00]));
        assert_eq!(node.scene(E0).unwrap().register().current(), 5);

        node.set_lightness(E0, 0xF000, None).unwrap();
        assert_eq!(node.scene(E0).unwrap().register().current(), 0);

        node.handle_message(&message(SCENE_RECALL, vec![0x05, 0x00, 3]));
        assert_eq!(lightness(&node), 0x2000);
        assert_eq!(level(&node, E0), (0x2000i32 - 32768) as i16);
        assert_eq!(node.scene(E0).unwrap().register().current(), 5);
    }

    #[test]
    fn test_timed_scene_recall_interpolates_and_settles() {
        let mut node = node(NodeConfig::dimmable_light());
        node.set_lightness(E0, 0x2000, None).unwrap();
        node.store_scene(E0, 5).unwrap();
        node.set_lightness(E0, 0xF000, None).unwrap();
        node.drain_events();

        node.handle_message(&message(SCENE_RECALL, vec![0x05, 0x00, 4, 0x0A, 0x00]));
        let register = node.scene(E0).unwrap().register();
        assert_eq!((register.current(), register.target()), (0, 5));

        node.advance(500);
        let mid = lightness(&node);
        assert!(mid > 0x2000 && mid < 0xF000, "mid-transition lightness {mid:#x}");
        let recalled = node.drain_events().into_iter().any(|event| {
            matches!(event, ModelEvent::StateUpdate { source: UpdateSource::SceneRecall, .. })
        });
        assert!(recalled);
        // Interpolation is no local change
        assert_eq!(node.scene(E0).unwrap().register().target(), 5);

        node.advance(600);
        assert_eq!(lightness(&node), 0x2000);
        let register = node.scene(E0).unwrap().register();
        assert_eq!((register.current(), register.target()), (5, 0));
    }

    #[test]
    fn test_interrupted_scene_recall_never_settles() {
        let mut node = node(NodeConfig::dimmable_light());
        node.set_lightness(E0, 0x2000, None).unwrap();
        node.store_scene(E0, 5).unwrap();
        node.set_lightness(E0, 0xF000, None).unwrap();

        node.recall_scene(E0, 5, Some(transition(10))).unwrap();
        node.advance(300);
        node.set_lightness(E0, 0x8000, None).unwrap();
        node.advance(1_000);

        let register = node.scene(E0).unwrap().register();
        assert_eq!((register.current(), register.target()), (0, 0));
        assert_eq!(lightness(&node), 0x8000);
    }

    #[test]
    fn test_acked_delayed_onoff_sets_reply_immediately() {
        let mut node = node(NodeConfig::dimmable_light());
        let replies = |out: &[OutboundMessage]| {
            out.iter()
                .filter(|m| !m.is_publication() && m.opcode == GEN_ONOFF_STATUS)
                .count()
        };

        // 1 s transition after 100 ms
        node.handle_message(&message(GEN_ONOFF_SET, vec![1, 3, 0x0A, 20]));
        let mut out = node.drain_outbox();
        assert_eq!(replies(&out), 1);

        node.advance(50);
        node.handle_message(&message(GEN_ONOFF_SET, vec![0, 4, 0x0A, 20]));
        node.advance(3_000);
        out.extend(node.drain_outbox());
        assert_eq!(replies(&out), 2);
        assert!(!onoff(&node));
    }

    #[test]
    fn test_scene_local_api_errors() {
        let mut node = node(NodeConfig::dimmable_light());
        assert!(matches!(node.store_scene(E0, 0), Err(NodeError::Mesh(MeshError::ProhibitedValue(_)))));
        assert_eq!(
            node.recall_scene(E0, 9, None),
            Err(NodeError::Scene(meshlight_state::SceneError::NotFound))
        );
        assert!(matches!(
            node.store_scene(ElementId(3), 1),
            Err(NodeError::Mesh(MeshError::NoSuchModel { .. }))
        ));
        assert_eq!(node.delete_scene(E0, 9), Ok(false));
    }

    #[test]
    fn test_hsl_scene_covers_sub_elements() {
        let mut node = node(NodeConfig::hsl_light());
        let value = HslValue {
            lightness: 0x4000,
            hue: 0x1000,
            saturation: 0x2000,
        };
        node.set_hsl(E0, value, None).unwrap();
        assert_eq!(lightness(&node), 0x4000);
        assert_eq!(level(&node, ElementId(1)), (0x1000i32 - 32768) as i16);
        node.store_scene(E0, 1).unwrap();

        node.set_level(ElementId(2), 0, None).unwrap();
        assert_eq!(node.hsl(E0).unwrap().present().saturation, 0x8000);
        assert_eq!(node.scene(E0).unwrap().register().current(), 0);

        node.recall_scene(E0, 1, None).unwrap();
        assert_eq!(node.hsl(E0).unwrap().present(), value);
        assert_eq!(level(&node, ElementId(2)), (0x2000i32 - 32768) as i16);
    }

    #[test]
    fn test_power_up_restores_last_state() {
        let nvm = MemoryNvm::new();
        let mut first = node_with(NodeConfig::dimmable_light(), nvm.clone());
        first.set_lightness(E0, 0x3000, None).unwrap();
        first.store_scene(E0, 7).unwrap();

        // OnPowerUp defaults to Off
        let second = node_with(NodeConfig::dimmable_light(), nvm.clone());
        assert_eq!(lightness(&second), 0);
        assert!(!onoff(&second));
        assert_eq!(second.scene(E0).unwrap().register().scenes(), vec![7]);

        let mut config = NodeConfig::dimmable_light();
        config.elements[0].models.retain(|k| *k != ModelKind::GenPowerOnOff);
        let third = node_with(config, nvm);
        assert_eq!(lightness(&third), 0x3000);
        assert!(onoff(&third));
    }

    #[test]
    fn test_scheduler_fires_from_clock() {
        let mut node = node(NodeConfig::dimmable_light());
        let local = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(6, 59, 58).unwrap();
        let tai = tai_for_local(local, TAI_UTC_DELTA_ZERO, TIME_ZONE_ZERO).unwrap();
        node.set_time(
            E0,
            TimeState {
                tai_seconds: tai,
                subsecond: 0,
                uncertainty: 0,
                time_authority: true,
                tai_utc_delta: TAI_UTC_DELTA_ZERO,
                time_zone_offset: TIME_ZONE_ZERO,
            },
        )
        .unwrap();
        let mut entry = ScheduleEntry::empty(4);
        entry.year = meshlight_wire::YEAR_ANY;
        entry.month = 0x0FFF;
        entry.day_of_week = 0x7F;
        entry.hour = 7;
        entry.action = ScheduleAction::TurnOn;
        assert!(node.set_schedule(E0, entry).unwrap());

        node.advance(1_000);
        assert!(!onoff(&node));
        node.advance(1_000);
        assert!(onoff(&node));
        assert_eq!(node.stats().schedules_fired, 1);
        assert!(node.drain_events().iter().any(|e| matches!(
            e,
            ModelEvent::StateUpdate {
                source: UpdateSource::Scheduler,
                ..
            }
        )));
    }

    #[test]
    fn test_trigger_unknown_schedule_is_noop() {
        let mut node = node(NodeConfig::dimmable_light());
        assert_eq!(node.trigger_schedule(E0, 3), Ok(None));
        assert_eq!(node.clear_schedule(E0, 3), Ok(false));
        assert_eq!(node.trigger_schedule(E0, 200), Ok(None));
        assert!(!onoff(&node));
    }

    #[test]
    fn test_flush_events() {
        let mut node = node(NodeConfig::default());
        node.set_onoff(E0, true, None).unwrap();
        let mut sink = Vec::new();
        assert!(node.flush_events(&mut sink) >= 2);
        assert!(node.drain_events().is_empty());
        assert!(sink.iter().all(|e| e.element() == E0));
    }

    #[test]
    fn test_publication_from_config() {
        let mut config = NodeConfig::default();
        config.elements[0].publish.push(PublishConfig {
            model: ModelKind::GenOnOff,
            address: 0xC000,
            app_key_index: 1,
            ttl: 4,
            min_interval_ms: 0,
        });
        let mut node = node(config);
        node.drain_outbox();
        node.set_onoff(E0, true, None).unwrap();
        let out = node.drain_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dst, meshlight_wire::Destination::Publish(MeshAddress(0xC000)));
        assert_eq!(out[0].ttl, 4);
    }
}
