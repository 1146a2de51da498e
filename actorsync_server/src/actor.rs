//! Actors.
//!
//! An actor is the engine-owned core state (`ActorCore`: id, class,
//! position, velocity, flags, visibility) plus a behavior object produced by
//! its class factory. The behavior object is where game code keeps the
//! actor's custom state.

use std::collections::BTreeSet;

use actorsync_shared::{
    clock::Millis,
    protocol::{round_wire, ActorDestroyed, ActorEvent, ActorFrame, ActorId, ClassId, SessionId},
};
use serde_json::Value;

/// Lifecycle phase. `Removed` is implicit: the registry drops the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorPhase {
    /// Created, not yet announced to any session.
    Created,
    Alive,
    /// Destroyed this step; DESTROY still to be sent, removed at end of step.
    Destroying,
}

/// A request made from inside an update to create another actor.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub class: ClassId,
    pub payload: Value,
}

/// Per-update context handed to behaviors.
pub struct ActorContext<'a> {
    now_ms: Millis,
    spawns: &'a mut Vec<SpawnRequest>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(now_ms: Millis, spawns: &'a mut Vec<SpawnRequest>) -> Self {
        Self { now_ms, spawns }
    }

    /// Simulation time of the step being run.
    pub fn now_ms(&self) -> Millis {
        self.now_ms
    }

    /// Creates an actor once the current update pass has finished.
    pub fn spawn(&mut self, class: impl Into<ClassId>, payload: Value) {
        self.spawns.push(SpawnRequest {
            class: class.into(),
            payload,
        });
    }
}

/// Engine-owned actor state.
#[derive(Debug, Clone)]
pub struct ActorCore {
    id: ActorId,
    class: ClassId,
    pub x: f64,
    pub y: f64,
    /// Per-tick velocity.
    pub mx: f64,
    pub my: f64,
    alive: bool,
    updated: bool,
    visible_to: BTreeSet<SessionId>,
    events: Vec<(String, Option<Value>)>,
}

impl ActorCore {
    pub(crate) fn new(id: ActorId, class: ClassId) -> Self {
        Self {
            id,
            class,
            x: 0.0,
            y: 0.0,
            mx: 0.0,
            my: 0.0,
            alive: true,
            updated: false,
            visible_to: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn class(&self) -> &ClassId {
        &self.class
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Flags the actor for destruction at the end of its update.
    pub fn destroy(&mut self) {
        self.alive = false;
    }

    /// Requests an UPDATE for this step.
    pub fn mark_updated(&mut self) {
        self.updated = true;
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Sets the velocity; a real change requests an UPDATE.
    pub fn set_velocity(&mut self, mx: f64, my: f64) {
        if mx != self.mx || my != self.my {
            self.mx = mx;
            self.my = my;
            self.updated = true;
        }
    }

    /// Moves by one tick of velocity.
    pub fn advance(&mut self) {
        self.x += self.mx;
        self.y += self.my;
    }

    /// False if any coordinate is NaN or infinite; such a state has no wire form.
    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.mx, self.my].iter().all(|v| v.is_finite())
    }

    /// Queues an event for every session that knows this actor.
    pub fn event(&mut self, kind: impl Into<String>, data: Option<Value>) {
        self.events.push((kind.into(), data));
    }

    pub fn visible_to(&self) -> &BTreeSet<SessionId> {
        &self.visible_to
    }

    /// Empty visibility means every session.
    pub fn is_visible_to(&self, session: SessionId) -> bool {
        self.visible_to.is_empty() || self.visible_to.contains(&session)
    }

    pub(crate) fn set_visible_to(&mut self, sessions: BTreeSet<SessionId>) {
        self.visible_to = sessions;
    }

    pub(crate) fn frame(&self, full: bool, payload: Option<Value>) -> ActorFrame {
        let mut frame = ActorFrame::new(self.id, (self.x, self.y), (self.mx, self.my));
        if full {
            frame.class = Some(self.class.clone());
        }
        frame.payload = payload;
        frame
    }

    /// Final position record. Non-finite coordinates are sent as 0.
    pub(crate) fn destroyed(&self) -> ActorDestroyed {
        let wire = |v: f64| if v.is_finite() { round_wire(v) } else { 0.0 };
        ActorDestroyed {
            id: self.id,
            x: wire(self.x),
            y: wire(self.y),
        }
    }

    pub(crate) fn pending_events(&self) -> impl Iterator<Item = ActorEvent> + '_ {
        self.events.iter().map(|(kind, data)| ActorEvent {
            id: self.id,
            kind: kind.clone(),
            data: data.clone(),
        })
    }

    pub(crate) fn end_pass(&mut self) {
        self.updated = false;
        self.events.clear();
    }
}

/// Behavior of one actor class. One instance per actor, built by the class
/// factory; the instance holds the actor's custom state.
pub trait ActorBehavior {
    /// Runs once at creation with the caller's payload.
    fn on_create(&mut self, _actor: &mut ActorCore, _payload: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs every step. An error destroys the actor.
    fn on_update(&mut self, _actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once when the actor starts being destroyed.
    fn on_destroy(&mut self, _actor: &mut ActorCore) {}

    /// Class-specific payload sent alongside the position record. `full` is
    /// set for INIT/CREATE. An error destroys the actor.
    fn serialize(&self, _actor: &ActorCore, _full: bool) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

/// Builds a behavior instance for a new actor.
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn ActorBehavior>>;

/// Registry slot: core state, behavior, lifecycle phase.
pub struct ActorEntry {
    pub(crate) core: ActorCore,
    pub(crate) behavior: Box<dyn ActorBehavior>,
    pub(crate) phase: ActorPhase,
}

impl ActorEntry {
    pub fn core(&self) -> &ActorCore {
        &self.core
    }

    pub fn phase(&self) -> ActorPhase {
        self.phase
    }

    /// Moves a live actor to `Destroying` and runs `on_destroy`. Returns
    /// false if it was already destroying.
    pub(crate) fn retire(&mut self) -> bool {
        if self.phase == ActorPhase::Destroying {
            return false;
        }
        self.core.alive = false;
        self.phase = ActorPhase::Destroying;
        self.behavior.on_destroy(&mut self.core);
        true
    }

    /// Closes the reconcile pass for this actor.
    pub(crate) fn end_pass(&mut self) {
        self.core.end_pass();
        if self.phase == ActorPhase::Created {
            self.phase = ActorPhase::Alive;
        }
    }
}
