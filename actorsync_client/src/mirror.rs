//! Client mirror.
//!
//! Local copy of the actors the server has introduced to this session.
//! Each mirrored actor gets a behavior instance from the class table, the
//! same way the server builds its actors.

use std::collections::{BTreeMap, HashMap};

use actorsync_shared::protocol::{ActorDestroyed, ActorEvent, ActorFrame, ActorId, ClassId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::interp::Interpolator;

/// Mirrored actor state as last received, advanced between updates.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorActor {
    id: ActorId,
    class: ClassId,
    pub x: f64,
    pub y: f64,
    pub mx: f64,
    pub my: f64,
}

impl MirrorActor {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn class(&self) -> &ClassId {
        &self.class
    }

    fn apply(&mut self, frame: &ActorFrame) {
        self.x = frame.x;
        self.y = frame.y;
        self.mx = frame.mx;
        self.my = frame.my;
    }
}

/// Client-side behavior of one actor class.
pub trait MirrorBehavior {
    /// INIT or CREATE arrived.
    fn on_create(&mut self, _actor: &mut MirrorActor, _payload: Option<&Value>) {}

    /// UPDATE arrived; position and velocity are already applied.
    fn on_update(&mut self, _actor: &mut MirrorActor, _payload: Option<&Value>) {}

    /// Runs every interpolation substep after the position advanced.
    fn on_interleave(&mut self, _actor: &mut MirrorActor) {}

    /// Runs on render substeps.
    fn on_render(&mut self, _actor: &MirrorActor) {}

    fn on_event(&mut self, _actor: &mut MirrorActor, _kind: &str, _data: Option<&Value>) {}

    /// DESTROY arrived, or the client disconnected. Not called on REMOVE.
    fn on_destroy(&mut self, _actor: &mut MirrorActor) {}
}

pub type MirrorFactory = Box<dyn Fn() -> Box<dyn MirrorBehavior>>;

struct MirrorEntry {
    actor: MirrorActor,
    behavior: Box<dyn MirrorBehavior>,
}

/// Mirrored actors in id order.
#[derive(Default)]
pub struct ClientMirror {
    classes: HashMap<ClassId, MirrorFactory>,
    actors: BTreeMap<ActorId, MirrorEntry>,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class<F>(&mut self, class: impl Into<ClassId>, factory: F)
    where
        F: Fn() -> Box<dyn MirrorBehavior> + 'static,
    {
        let class = class.into();
        if self.classes.insert(class.clone(), Box::new(factory)).is_some() {
            warn!(class = %class, "Mirror class registered twice, replacing");
        }
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn get(&self, id: ActorId) -> Option<&MirrorActor> {
        self.actors.get(&id).map(|e| &e.actor)
    }

    pub fn actors(&self) -> impl Iterator<Item = &MirrorActor> {
        self.actors.values().map(|e| &e.actor)
    }

    /// Handles an INIT/CREATE record. Replaces an existing mirror with the
    /// same id.
    pub fn introduce(&mut self, frame: &ActorFrame) {
        let Some(class) = &frame.class else {
            warn!(actor = %frame.id, "Introduction without class, skipped");
            return;
        };
        let Some(factory) = self.classes.get(class) else {
            warn!(actor = %frame.id, class = %class, "Unknown actor class, skipped");
            return;
        };
        let mut actor = MirrorActor {
            id: frame.id,
            class: class.clone(),
            x: 0.0,
            y: 0.0,
            mx: 0.0,
            my: 0.0,
        };
        actor.apply(frame);
        let mut behavior = factory();
        behavior.on_create(&mut actor, frame.payload.as_ref());
        self.actors.insert(frame.id, MirrorEntry { actor, behavior });
    }

    pub fn update(&mut self, frame: &ActorFrame) {
        match self.actors.get_mut(&frame.id) {
            Some(entry) => {
                entry.actor.apply(frame);
                entry.behavior.on_update(&mut entry.actor, frame.payload.as_ref());
            }
            None => debug!(actor = %frame.id, "Update for unknown actor ignored"),
        }
    }

    /// Drops a mirror that left this session's view. `on_destroy` is not run.
    pub fn remove(&mut self, id: ActorId) {
        if self.actors.remove(&id).is_none() {
            debug!(actor = %id, "Remove for unknown actor ignored");
        }
    }

    pub fn destroy(&mut self, record: &ActorDestroyed) {
        match self.actors.remove(&record.id) {
            Some(mut entry) => {
                entry.actor.x = record.x;
                entry.actor.y = record.y;
                entry.behavior.on_destroy(&mut entry.actor);
            }
            None => debug!(actor = %record.id, "Destroy for unknown actor ignored"),
        }
    }

    pub fn event(&mut self, event: &ActorEvent) {
        match self.actors.get_mut(&event.id) {
            Some(entry) => {
                entry
                    .behavior
                    .on_event(&mut entry.actor, &event.kind, event.data.as_ref())
            }
            None => debug!(actor = %event.id, kind = %event.kind, "Event for unknown actor ignored"),
        }
    }

    /// Runs `on_destroy` for every mirror and clears the set.
    pub fn destroy_all(&mut self) {
        for (_, mut entry) in std::mem::take(&mut self.actors) {
            entry.behavior.on_destroy(&mut entry.actor);
        }
    }

    /// One interpolation substep for every mirror.
    pub fn interleave(&mut self, interp: &Interpolator, render: bool) {
        for entry in self.actors.values_mut() {
            interp.advance(&mut entry.actor);
            entry.behavior.on_interleave(&mut entry.actor);
            if render {
                entry.behavior.on_render(&entry.actor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use serde_json::json;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Logged(Log);

    impl MirrorBehavior for Logged {
        fn on_create(&mut self, actor: &mut MirrorActor, payload: Option<&Value>) {
            let payload = payload.map(Value::to_string).unwrap_or_default();
            self.0.borrow_mut().push(format!("create {} {payload}", actor.id()));
        }

        fn on_update(&mut self, actor: &mut MirrorActor, _payload: Option<&Value>) {
            self.0.borrow_mut().push(format!("update {}", actor.id()));
        }

        fn on_event(&mut self, actor: &mut MirrorActor, kind: &str, _data: Option<&Value>) {
            self.0.borrow_mut().push(format!("event {} {kind}", actor.id()));
        }

        fn on_destroy(&mut self, actor: &mut MirrorActor) {
            self.0
                .borrow_mut()
                .push(format!("destroy {} {},{}", actor.id(), actor.x, actor.y));
        }
    }

    fn mirror() -> (ClientMirror, Log) {
        let log: Log = Rc::default();
        let mut mirror = ClientMirror::new();
        let l = log.clone();
        mirror.register_class("ship", move || Box::new(Logged(l.clone())));
        (mirror, log)
    }

    fn full(id: u64, class: &str) -> ActorFrame {
        let mut f = ActorFrame::new(ActorId(id), (1.0, 2.0), (0.5, 0.0));
        f.class = Some(ClassId::from(class));
        f.payload = Some(json!({"hp": 3}));
        f
    }

    #[test]
    fn lifecycle_callbacks_follow_the_wire() {
        let (mut m, log) = mirror();
        m.introduce(&full(1, "ship"));
        m.update(&ActorFrame::new(ActorId(1), (4.0, 2.0), (0.0, 0.0)));
        m.event(&ActorEvent {
            id: ActorId(1),
            kind: "hit".into(),
            data: None,
        });
        assert_eq!(m.get(ActorId(1)).map(|a| a.x), Some(4.0));
        m.destroy(&ActorDestroyed {
            id: ActorId(1),
            x: 9.5,
            y: 2.0,
        });
        assert!(m.is_empty());
        assert_eq!(
            *log.borrow(),
            vec![
                "create a1 {\"hp\":3}".to_string(),
                "update a1".to_string(),
                "event a1 hit".to_string(),
                "destroy a1 9.5,2".to_string(),
            ]
        );
    }

    #[test]
    fn remove_does_not_destroy() {
        let (mut m, log) = mirror();
        m.introduce(&full(2, "ship"));
        m.remove(ActorId(2));
        assert!(!m.contains(ActorId(2)));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn unknown_class_and_ids_are_ignored() {
        let (mut m, log) = mirror();
        m.introduce(&full(3, "ghost"));
        m.update(&ActorFrame::new(ActorId(3), (0.0, 0.0), (0.0, 0.0)));
        m.remove(ActorId(3));
        m.destroy(&ActorDestroyed {
            id: ActorId(3),
            x: 0.0,
            y: 0.0,
        });
        assert!(m.is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn disconnect_destroys_everything() {
        let (mut m, log) = mirror();
        m.introduce(&full(1, "ship"));
        m.introduce(&full(2, "ship"));
        m.destroy_all();
        assert!(m.is_empty());
        assert_eq!(log.borrow().iter().filter(|l| l.starts_with("destroy")).count(), 2);
    }
}
