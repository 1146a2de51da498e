//! Deterministic scenarios driven through `GameServer` with in-memory
//! connections.

use std::collections::BTreeSet;

use actorsync_client::{GameClient, MirrorBehavior};
use actorsync_server::{demo::DemoGame, GameServer, SessionError};
use actorsync_shared::{
    config::EngineConfig,
    protocol::{ActorId, MsgType, ServerMsg, SessionId},
    transport::MemoryConnection,
};
use actorsync_tests::{init_tracing, kinds, test_server, WireChecker};
use serde_json::json;

struct Plain;

impl MirrorBehavior for Plain {}

#[test]
fn scenario_a_client_dead_reckons_between_updates() {
    let conn = MemoryConnection::new();
    let mut client = GameClient::new(&EngineConfig::default(), (), conn.boxed()).unwrap();
    client.mirror_mut().register_class("mover", || Box::new(Plain));

    client.handle_frame("1,1,50,{}", 0).unwrap();
    assert_eq!(client.interpolator().steps(), 4);
    client
        .handle_frame("4,[[1,0.0,0.0,8.0,0.0,\"mover\"]]", 0)
        .unwrap();

    let mut xs = Vec::new();
    for t in [0, 10, 20, 30] {
        client.tick(t);
        xs.push(client.mirror().get(ActorId(1)).unwrap().x);
    }
    assert_eq!(xs, vec![2.0, 4.0, 6.0, 8.0]);

    // The next network update snaps the mirror back to the server position.
    client
        .handle_frame("6,[[1,8.0,0.0,8.0,0.0]]", 40)
        .unwrap();
    assert_eq!(client.mirror().get(ActorId(1)).unwrap().x, 8.0);
}

#[test]
fn scenario_b_late_joiner_gets_init_for_visible_actors_only() {
    init_tracing();
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();

    let registry = &mut server.state_mut().registry;
    let r1 = registry.create("rock", json!(null)).unwrap();
    let r2 = registry.create("rock", json!(null)).unwrap();
    let r3 = registry.create("rock", json!(null)).unwrap();
    assert!(registry.set_visibility(r3, [sa]));
    server.tick(0);

    let b = MemoryConnection::new();
    let sb = server.accept(b.boxed()).unwrap();
    server.tick(50);

    let frames = b.take_frames();
    assert_eq!(
        frames,
        vec![
            format!("1,{},50,{{}}", sb.0),
            "4,[[1,0.0,0.0,0.0,0.0,\"rock\"]],[[2,0.0,0.0,0.0,0.0,\"rock\"]]".to_string(),
        ]
    );
    match ServerMsg::decode(&frames[1]).unwrap() {
        ServerMsg::ActorsInit(init) => {
            let ids: Vec<ActorId> = init.iter().map(|f| f.id).collect();
            assert_eq!(ids, vec![r1, r2]);
        }
        other => panic!("expected INIT, got {other:?}"),
    }

    // The first session saw all three created in one batch.
    let a_frames = a.take_frames();
    assert_eq!(kinds(&a_frames), vec![MsgType::GameStart, MsgType::ActorsCreate]);
    match ServerMsg::decode(&a_frames[1]).unwrap() {
        ServerMsg::ActorsCreate(created) => assert_eq!(created.len(), 3),
        other => panic!("expected CREATE, got {other:?}"),
    }
}

#[test]
fn scenario_c_losing_visibility_sends_one_remove() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    let b = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();
    let sb = server.accept(b.boxed()).unwrap();
    let id = server
        .state_mut()
        .registry
        .create("mover", json!({"mx": 1.0}))
        .unwrap();
    server.tick(0);
    a.take_frames();
    b.take_frames();

    server.state_mut().registry.set_visibility(id, [sb]);
    server.tick(50);
    server.tick(100);
    assert_eq!(a.take_frames(), vec!["7,[1]".to_string()]);
    assert!(b.take_frames().is_empty());
    assert!(!server.state().sessions().get(sa).unwrap().knows(id));

    server.state_mut().registry.destroy(id);
    server.tick(150);
    assert!(a.take_frames().is_empty());
    assert_eq!(b.take_frames(), vec!["8,[1,3.0,0.0]".to_string()]);
}

#[test]
fn scenario_d_connection_over_the_cap_is_refused() {
    let mut server = test_server(|cfg| cfg.max_clients = 1);
    let a = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();

    let b = MemoryConnection::new();
    assert!(matches!(
        server.accept(b.boxed()),
        Err(SessionError::Full { max: 1 })
    ));
    assert!(b.is_closed());
    assert!(b.frames().is_empty());
    assert_eq!(server.state().client_count(), 1);

    // A freed slot can be reused, with a fresh id.
    server.disconnect(sa);
    let c = MemoryConnection::new();
    let sc = server.accept(c.boxed()).unwrap();
    assert!(sc > sa);
}

#[test]
fn oversized_message_closes_without_side_effects() {
    let mut server = test_server(|cfg| cfg.max_message_len = 128);
    let a = MemoryConnection::new();
    let b = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();
    let sb = server.accept(b.boxed()).unwrap();
    server.state_mut().registry.create("rock", json!(null)).unwrap();
    server.tick(0);

    let at_limit = format!("{{k:\"{}\"}}", "x".repeat(122));
    assert_eq!(at_limit.chars().count(), 128);
    server.handle_frame(sa, &at_limit).unwrap();
    assert!(!a.is_closed());

    let over = format!("{{k:\"{}\"}}", "x".repeat(123));
    assert!(server.handle_frame(sb, &over).is_err());
    assert!(b.is_closed());
    assert_eq!(server.state().client_count(), 1);
    assert_eq!(server.state().registry.actor_count(), 1);
    assert!(server.state().sessions().get(sa).is_some());
}

#[test]
fn destroying_twice_sends_one_destroy_per_session() {
    let mut server = test_server(|_| {});
    let conns: Vec<MemoryConnection> = (0..3).map(|_| MemoryConnection::new()).collect();
    for c in &conns {
        server.accept(c.boxed()).unwrap();
    }
    let id = server.state_mut().registry.create("rock", json!(null)).unwrap();
    server.tick(0);
    for c in &conns {
        c.take_frames();
    }

    assert!(server.state_mut().registry.destroy(id));
    assert!(!server.state_mut().registry.destroy(id));
    server.tick(50);
    assert!(!server.state_mut().registry.destroy(id));
    server.tick(100);

    for c in &conns {
        assert_eq!(c.take_frames(), vec!["8,[1,0.0,0.0]".to_string()]);
    }
}

#[test]
fn actor_created_and_destroyed_in_one_step_is_never_sent() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    server.accept(a.boxed()).unwrap();
    a.take_frames();

    let id = server.state_mut().registry.create("rock", json!(null)).unwrap();
    server.state_mut().registry.destroy(id);
    server.tick(0);
    assert!(a.take_frames().is_empty());
    assert!(!server.state().registry.contains(id));
}

#[test]
fn serialize_failure_destroys_only_that_actor() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    server.accept(a.boxed()).unwrap();
    a.take_frames();

    let bad = server.state_mut().registry.create("broken", json!(null)).unwrap();
    let good = server.state_mut().registry.create("rock", json!(null)).unwrap();
    server.tick(0);

    let frames = a.take_frames();
    assert_eq!(frames, vec!["5,[[2,0.0,0.0,0.0,0.0,\"rock\"]]".to_string()]);
    assert!(!server.state().registry.contains(bad));
    assert!(server.state().registry.contains(good));
    assert_eq!(server.state().registry.actor_count(), 1);
}

#[test]
fn events_follow_introduction_and_respect_visibility() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    let b = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();
    server.accept(b.boxed()).unwrap();
    a.take_frames();
    b.take_frames();

    let id = server.state_mut().registry.create("pinger", json!(null)).unwrap();
    server.state_mut().registry.set_visibility(id, [sa]);
    server.tick(0);

    assert_eq!(
        a.take_frames(),
        vec![
            "5,[[1,0.0,0.0,0.0,0.0,\"pinger\"]]".to_string(),
            "9,1,\"ping\"".to_string(),
        ]
    );
    assert!(b.take_frames().is_empty());

    server.state_mut().registry.destroy(id);
    server.tick(50);
    assert_eq!(kinds(&a.take_frames()), vec![MsgType::ActorsDestroy]);
}

#[test]
fn shared_fields_are_broadcast_once_per_change() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    server.accept(a.boxed()).unwrap();
    a.take_frames();

    server.state_mut().fields.set("round", json!(1));
    server.state_mut().fields.set_item("scores", "s1", json!(10));
    server.tick(0);
    server.tick(50);
    assert_eq!(
        a.take_frames(),
        vec!["2,{round:1,scores:{s1:10}}".to_string()]
    );

    server.state_mut().fields.set_quiet("round", json!(2));
    server.tick(100);
    assert!(a.take_frames().is_empty());
}

#[test]
fn known_sets_match_the_wire() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();
    let mut checker = WireChecker::new();

    let ids: Vec<ActorId> = (0..4)
        .map(|i| {
            server
                .state_mut()
                .registry
                .create("mover", json!({"mx": i}))
                .unwrap()
        })
        .collect();
    server.tick(0);
    server.state_mut().registry.set_visibility(ids[0], [SessionId(99)]);
    server.state_mut().registry.destroy(ids[1]);
    server.state_mut().registry.get_mut(ids[2]).unwrap().set_velocity(5.0, 5.0);
    server.tick(50);
    server.state_mut().registry.set_visibility(ids[0], Vec::<SessionId>::new());
    server.tick(100);

    checker.feed_all(&a.take_frames());
    assert!(checker.violations().is_empty(), "{:?}", checker.violations());
    let known: BTreeSet<ActorId> =
        server.state().sessions().get(sa).unwrap().known_actors().collect();
    assert_eq!(&known, checker.known());
    assert_eq!(known.into_iter().collect::<Vec<_>>(), vec![ids[0], ids[2], ids[3]]);
}

#[test]
fn owner_dropped_at_flush_still_destroys_its_ball_for_others() {
    init_tracing();
    let mut server = GameServer::new(EngineConfig::default(), DemoGame::new()).unwrap();
    server.start(0).unwrap();
    let a = MemoryConnection::new();
    let b = MemoryConnection::new();
    let sa = server.accept(a.boxed()).unwrap();
    let sb = server.accept(b.boxed()).unwrap();
    server.tick(0);

    let ball_a = server.handler().ball_of(sa).unwrap();
    let ball_b = server.handler().ball_of(sb).unwrap();
    let mut checker = WireChecker::new();
    checker.feed_all(&b.take_frames());
    assert!(checker.known().contains(&ball_a));

    a.fail_sends(true);
    server.state_mut().registry.get_mut(ball_a).unwrap().mark_updated();
    server.tick(50);
    assert!(server.state().sessions().get(sa).is_none());
    server.tick(100);
    server.tick(150);

    let frames = b.take_frames();
    checker.feed_all(&frames);
    assert!(checker.violations().is_empty(), "{:?}", checker.violations());
    assert!(kinds(&frames).contains(&MsgType::ActorsDestroy));
    assert!(!server.state().registry.contains(ball_a));

    let known: BTreeSet<ActorId> = server.state().sessions().get(sb).unwrap().known_actors().collect();
    assert_eq!(&known, checker.known());
    assert_eq!(known, BTreeSet::from([ball_b]));
}

#[test]
fn non_finite_actor_is_destroyed_without_spoiling_its_batch() {
    let mut server = test_server(|_| {});
    let a = MemoryConnection::new();
    server.accept(a.boxed()).unwrap();

    let bad = server.state_mut().registry.create("rock", json!(null)).unwrap();
    let good = server.state_mut().registry.create("rock", json!(null)).unwrap();
    server.state_mut().registry.get_mut(bad).unwrap().x = f64::NAN;
    server.tick(0);

    let frames = a.take_frames();
    assert_eq!(frames[1], "5,[[2,0.0,0.0,0.0,0.0,\"rock\"]]");
    assert!(!server.state().registry.contains(bad));

    let mut client = GameClient::new(&EngineConfig::default(), (), MemoryConnection::new().boxed()).unwrap();
    client.mirror_mut().register_class("rock", || Box::new(Plain));
    for f in &frames {
        client.handle_frame(f, 0).unwrap();
    }
    assert!(client.mirror().contains(good));

    // An introduced actor going non-finite is destroyed with a decodable record.
    server.state_mut().registry.get_mut(good).unwrap().y = f64::INFINITY;
    server.tick(50);
    let frames = a.take_frames();
    assert_eq!(frames, vec!["8,[2,0.0,0.0]".to_string()]);
    client.handle_frame(&frames[0], 50).unwrap();
    assert!(client.mirror().is_empty());
    assert_eq!(server.state().registry.actor_count(), 0);
}
