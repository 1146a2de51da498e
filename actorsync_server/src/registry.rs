//! Actor registry.
//!
//! Owns every actor, hands out ids, runs the per-step update pass and removes
//! destroyed actors at the end of the step. Actors are kept in id order so
//! every pass visits them in creation order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use actorsync_shared::{
    clock::Millis,
    protocol::{ActorId, ClassId, SessionId},
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::actor::{
    ActorBehavior, ActorContext, ActorCore, ActorEntry, ActorPhase, BehaviorFactory, SpawnRequest,
};

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("unknown actor class {0}")]
    UnknownClass(ClassId),
    #[error("creating {class} actor failed: {reason}")]
    CreateFailed { class: ClassId, reason: String },
}

#[derive(Default)]
pub struct ActorRegistry {
    next_id: u64,
    classes: HashMap<ClassId, BehaviorFactory>,
    actors: BTreeMap<ActorId, ActorEntry>,
    alive: usize,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the behavior factory for a class.
    pub fn register_class<F>(&mut self, class: impl Into<ClassId>, factory: F)
    where
        F: Fn() -> Box<dyn ActorBehavior> + 'static,
    {
        let class = class.into();
        if self.classes.insert(class.clone(), Box::new(factory)).is_some() {
            warn!(class = %class, "Actor class registered twice, replacing");
        }
    }

    pub fn has_class(&self, class: &ClassId) -> bool {
        self.classes.contains_key(class)
    }

    /// Creates an actor. It is announced with CREATE on the next reconcile.
    pub fn create(&mut self, class: impl Into<ClassId>, payload: Value) -> Result<ActorId, ActorError> {
        let class = class.into();
        let factory = self
            .classes
            .get(&class)
            .ok_or_else(|| ActorError::UnknownClass(class.clone()))?;

        self.next_id += 1;
        let id = ActorId(self.next_id);
        let mut core = ActorCore::new(id, class.clone());
        let mut behavior = factory();
        behavior
            .on_create(&mut core, &payload)
            .map_err(|e| ActorError::CreateFailed {
                class: class.clone(),
                reason: format!("{e:#}"),
            })?;

        self.actors.insert(
            id,
            ActorEntry {
                core,
                behavior,
                phase: ActorPhase::Created,
            },
        );
        self.alive += 1;
        debug!(actor = %id, class = %class, "Actor created");
        Ok(id)
    }

    /// Destroys an actor. Returns false for unknown or already destroyed ids.
    pub fn destroy(&mut self, id: ActorId) -> bool {
        match self.actors.get_mut(&id) {
            Some(entry) => {
                let retired = entry.retire();
                if retired {
                    self.alive -= 1;
                    debug!(actor = %id, "Actor destroyed");
                }
                retired
            }
            None => {
                debug!(actor = %id, "Destroy for unknown actor ignored");
                false
            }
        }
    }

    /// Destroys every live actor.
    pub fn destroy_all(&mut self) -> usize {
        let mut n = 0;
        for entry in self.actors.values_mut() {
            if entry.retire() {
                n += 1;
            }
        }
        self.alive -= n;
        n
    }

    /// Replaces the set of sessions an actor is sent to. Empty means all.
    pub fn set_visibility(
        &mut self,
        id: ActorId,
        sessions: impl IntoIterator<Item = SessionId>,
    ) -> bool {
        match self.actors.get_mut(&id) {
            Some(entry) if entry.phase != ActorPhase::Destroying => {
                entry.core.set_visible_to(sessions.into_iter().collect::<BTreeSet<_>>());
                true
            }
            _ => {
                debug!(actor = %id, "Visibility change for unknown actor ignored");
                false
            }
        }
    }

    pub fn get(&self, id: ActorId) -> Option<&ActorCore> {
        self.actors.get(&id).map(|e| &e.core)
    }

    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut ActorCore> {
        self.actors.get_mut(&id).map(|e| &mut e.core)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn phase(&self, id: ActorId) -> Option<ActorPhase> {
        self.actors.get(&id).map(|e| e.phase)
    }

    /// Ids of actors that are not being destroyed.
    pub fn ids(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.actors
            .iter()
            .filter(|(_, e)| e.phase != ActorPhase::Destroying)
            .map(|(id, _)| *id)
    }

    /// Live actors of one class.
    pub fn actors_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a ActorCore> + 'a {
        self.actors
            .values()
            .filter(move |e| e.phase != ActorPhase::Destroying && e.core.class().as_str() == class)
            .map(|e| &e.core)
    }

    /// Number of live actors across all classes.
    pub fn actor_count(&self) -> usize {
        self.alive
    }

    /// Runs `on_update` for every live actor, then creates spawned actors.
    pub fn update_all(&mut self, now_ms: Millis) {
        let mut spawns: Vec<SpawnRequest> = Vec::new();
        let mut retired = 0;

        for entry in self.actors.values_mut() {
            if entry.phase == ActorPhase::Destroying {
                continue;
            }
            let mut ctx = ActorContext::new(now_ms, &mut spawns);
            if let Err(e) = entry.behavior.on_update(&mut entry.core, &mut ctx) {
                warn!(actor = %entry.core.id(), class = %entry.core.class(), error = %e, "Actor update failed, destroying");
                entry.core.destroy();
            }
            if !entry.core.is_alive() && entry.retire() {
                retired += 1;
            }
        }
        self.alive -= retired;

        for req in spawns {
            if let Err(e) = self.create(req.class, req.payload) {
                warn!(error = %e, "Spawn request failed");
            }
        }
    }

    /// Removes actors destroyed during this step.
    pub fn sweep(&mut self) {
        self.actors.retain(|_, e| e.phase != ActorPhase::Destroying);
        self.alive = self.actors.len();
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut ActorEntry> {
        self.actors.values_mut()
    }

    /// Accounts for entries retired outside the registry (serialization errors).
    pub(crate) fn note_retired(&mut self, n: usize) {
        self.alive -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Mover;

    impl ActorBehavior for Mover {
        fn on_create(&mut self, actor: &mut ActorCore, payload: &Value) -> anyhow::Result<()> {
            actor.mx = payload["mx"].as_f64().unwrap_or(0.0);
            Ok(())
        }

        fn on_update(&mut self, actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
            actor.advance();
            if actor.x >= 3.0 {
                actor.destroy();
            }
            Ok(())
        }
    }

    struct Broken;

    impl ActorBehavior for Broken {
        fn on_update(&mut self, _actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Spawner;

    impl ActorBehavior for Spawner {
        fn on_update(&mut self, _actor: &mut ActorCore, ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
            ctx.spawn("mover", json!({"mx": 1.0}));
            Ok(())
        }
    }

    fn registry() -> ActorRegistry {
        let mut reg = ActorRegistry::new();
        reg.register_class("mover", || Box::new(Mover));
        reg.register_class("broken", || Box::new(Broken));
        reg.register_class("spawner", || Box::new(Spawner));
        reg
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut reg = registry();
        let a = reg.create("mover", json!({})).unwrap();
        let b = reg.create("mover", json!({})).unwrap();
        reg.destroy(a);
        reg.sweep();
        let c = reg.create("mover", json!({})).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn unknown_class_consumes_no_id() {
        let mut reg = registry();
        assert!(matches!(
            reg.create("ghost", json!(null)),
            Err(ActorError::UnknownClass(_))
        ));
        assert_eq!(reg.create("mover", json!({})).unwrap(), ActorId(1));
    }

    #[test]
    fn self_destruct_during_update_is_swept_at_end_of_step() {
        let mut reg = registry();
        let id = reg.create("mover", json!({"mx": 1.5})).unwrap();
        reg.update_all(0);
        assert_eq!(reg.phase(id), Some(ActorPhase::Created));
        reg.update_all(50);
        assert_eq!(reg.phase(id), Some(ActorPhase::Destroying));
        assert_eq!(reg.actor_count(), 0);
        reg.sweep();
        assert!(!reg.contains(id));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut reg = registry();
        let id = reg.create("mover", json!({})).unwrap();
        assert!(reg.destroy(id));
        assert!(!reg.destroy(id));
        assert_eq!(reg.actor_count(), 0);
        assert!(!reg.destroy(ActorId(99)));
    }

    #[test]
    fn failing_update_destroys_only_that_actor() {
        let mut reg = registry();
        let bad = reg.create("broken", json!({})).unwrap();
        let good = reg.create("mover", json!({})).unwrap();
        reg.update_all(0);
        assert_eq!(reg.phase(bad), Some(ActorPhase::Destroying));
        assert_eq!(reg.phase(good), Some(ActorPhase::Created));
        assert_eq!(reg.actor_count(), 1);
    }

    #[test]
    fn spawns_are_created_after_the_pass() {
        let mut reg = registry();
        reg.create("spawner", json!({})).unwrap();
        reg.update_all(0);
        assert_eq!(reg.actor_count(), 2);
        assert_eq!(reg.actors_of("mover").count(), 1);
    }

    #[test]
    fn visibility_of_unknown_actor_is_ignored() {
        let mut reg = registry();
        assert!(!reg.set_visibility(ActorId(5), [SessionId(1)]));
    }
}
