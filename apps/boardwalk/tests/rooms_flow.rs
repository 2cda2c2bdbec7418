mod common;

use boardwalk::protocol::{ClientEvent, ServerEvent};
use common::{connect, create_room, engine, join};

/// Two-party room bring-up, event by event: the creator is not a participant
/// until it announces a peer id, and `ready` is what fans out `user-joined`.
#[tokio::test]
async fn two_party_room_bring_up() {
    let engine = engine();
    let mut c1 = connect(&engine, "");
    let mut c2 = connect(&engine, "");

    let room_id = create_room(&engine, &mut c1);

    join(&engine, &c2, &room_id, "p2");
    let users = c2.drain();
    let get_users = users.iter().find_map(|ev| match ev {
        ServerEvent::GetUsers {
            room_id: r,
            participants,
        } => Some((r.clone(), participants.clone())),
        _ => None,
    });
    assert_eq!(get_users, Some((room_id.clone(), vec!["p2".to_string()])));

    join(&engine, &c1, &room_id, "p1");
    let users = c1.drain();
    let get_users = users.iter().find_map(|ev| match ev {
        ServerEvent::GetUsers { participants, .. } => Some(participants.clone()),
        _ => None,
    });
    assert_eq!(get_users, Some(vec!["p2".to_string(), "p1".to_string()]));

    c2.drain();
    engine.handle_event(&c1.id, ClientEvent::Ready);
    assert!(c2
        .drain()
        .iter()
        .any(|ev| matches!(ev, ServerEvent::UserJoined { peer_id } if peer_id == "p1")));
    // The announcer itself hears nothing back.
    assert!(c1.drain().is_empty());
}

#[tokio::test]
async fn leaving_notifies_the_rest_of_the_room() {
    let engine = engine();
    let mut c1 = connect(&engine, "");
    let mut c2 = connect(&engine, "");
    let room_id = create_room(&engine, &mut c1);
    join(&engine, &c1, &room_id, "p1");
    join(&engine, &c2, &room_id, "p2");
    c1.drain();

    engine.handle_event(&c2.id, ClientEvent::LeaveRoom);
    assert!(c1
        .drain()
        .iter()
        .any(|ev| matches!(ev, ServerEvent::UserLeft { peer_id } if peer_id == "p2")));

    // The leaver can come back under the same identity.
    join(&engine, &c2, &room_id, "p2");
    assert!(c2
        .drain()
        .iter()
        .any(|ev| matches!(ev, ServerEvent::GetUsers { participants, .. }
            if participants.contains(&"p2".to_string()))));
}

#[tokio::test]
async fn disconnect_behaves_like_leaving() {
    let engine = engine();
    let mut c1 = connect(&engine, "");
    let c2 = connect(&engine, "");
    let room_id = create_room(&engine, &mut c1);
    join(&engine, &c1, &room_id, "p1");
    join(&engine, &c2, &room_id, "p2");
    c1.drain();

    engine.handle_disconnect(&c2.id);
    assert!(c1
        .drain()
        .iter()
        .any(|ev| matches!(ev, ServerEvent::UserLeft { peer_id } if peer_id == "p2")));
}
