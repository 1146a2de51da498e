//! Synchronization engine.
//!
//! Once per step, after every actor has updated, each (actor, session) pair
//! is reconciled against the session's known set:
//!
//! 1. destroying + known       → DESTROY, forget
//! 2. not visible + known      → REMOVE, forget
//! 3. visible + unknown        → CREATE on the actor's first pass, else INIT; learn
//! 4. visible + known + dirty  → UPDATE (dirty = updated flag or first pass)
//!
//! A session is therefore never sent UPDATE, REMOVE or DESTROY for an id it
//! has not been introduced to, and never introduced twice in a row.

use actorsync_shared::protocol::ActorFrame;
use tracing::warn;

use crate::{
    actor::{ActorEntry, ActorPhase},
    registry::ActorRegistry,
    session::{Session, SessionTable},
};

/// Serialized forms of one actor for the current pass.
#[derive(Default)]
struct Frames {
    full: Option<ActorFrame>,
    partial: Option<ActorFrame>,
}

fn is_dirty(entry: &ActorEntry) -> bool {
    entry.core.is_updated() || entry.phase == ActorPhase::Created
}

/// Serializes whatever forms `sessions` need. An actor that cannot be put on
/// the wire (serialize error, non-finite coordinates) is retired and `None`
/// returned; the caller then treats it as destroying.
fn prepare<'s>(
    entry: &mut ActorEntry,
    sessions: impl Iterator<Item = &'s Session>,
) -> Option<Frames> {
    if entry.phase == ActorPhase::Destroying {
        return Some(Frames::default());
    }
    let id = entry.core.id();
    if !entry.core.is_finite() {
        warn!(actor = %id, class = %entry.core.class(), "Actor state is not finite, destroying");
        entry.retire();
        return None;
    }
    let (mut need_full, mut need_partial) = (false, false);
    for s in sessions {
        if entry.core.is_visible_to(s.id()) {
            if s.knows(id) {
                need_partial |= is_dirty(entry);
            } else {
                need_full = true;
            }
        }
    }

    let mut frames = Frames::default();
    for (full, needed) in [(true, need_full), (false, need_partial)] {
        if !needed {
            continue;
        }
        match entry.behavior.serialize(&entry.core, full) {
            Ok(payload) => {
                let frame = entry.core.frame(full, payload);
                if full {
                    frames.full = Some(frame);
                } else {
                    frames.partial = Some(frame);
                }
            }
            Err(e) => {
                warn!(actor = %id, class = %entry.core.class(), error = %e, "Actor serialize failed, destroying");
                entry.retire();
                return None;
            }
        }
    }
    Some(frames)
}

/// Applies the precedence rules to one (actor, session) pair.
fn reconcile_pair(entry: &ActorEntry, frames: &Frames, session: &mut Session, with_events: bool) {
    let core = &entry.core;
    let id = core.id();
    let knows = session.knows(id);

    if entry.phase == ActorPhase::Destroying {
        if knows {
            if with_events {
                session.queues.events.extend(core.pending_events());
            }
            session.forget(id);
            session.queues.destroy.push(core.destroyed());
        }
        return;
    }

    let visible = core.is_visible_to(session.id());
    if !visible {
        if knows {
            session.forget(id);
            session.queues.remove.push(id);
        }
        return;
    }

    if !knows {
        if let Some(full) = &frames.full {
            session.learn(id);
            if entry.phase == ActorPhase::Created {
                session.queues.create.push(full.clone());
            } else {
                session.queues.init.push(full.clone());
            }
        }
    } else if is_dirty(entry) {
        if let Some(partial) = &frames.partial {
            session.queues.update.push(partial.clone());
        }
    }

    if with_events && session.knows(id) {
        session.queues.events.extend(core.pending_events());
    }
}

/// Reconciles every actor against every session and closes the pass.
pub fn reconcile(registry: &mut ActorRegistry, sessions: &mut SessionTable) {
    let mut failed = 0;
    for entry in registry.entries_mut() {
        let frames = prepare(entry, sessions.iter()).unwrap_or_else(|| {
            // Retired; rule 1 now applies.
            failed += 1;
            Frames::default()
        });
        for session in sessions.iter_mut() {
            reconcile_pair(entry, &frames, session, true);
        }
        entry.end_pass();
    }
    registry.note_retired(failed);
}

/// Queues INIT for every announced actor visible to a newly accepted session.
pub fn introduce(registry: &mut ActorRegistry, session: &mut Session) {
    let mut failed = 0;
    for entry in registry.entries_mut() {
        if entry.phase != ActorPhase::Alive {
            continue;
        }
        match prepare(entry, std::iter::once(&*session)) {
            Some(frames) => reconcile_pair(entry, &frames, session, false),
            None => failed += 1,
        }
    }
    registry.note_retired(failed);
}
