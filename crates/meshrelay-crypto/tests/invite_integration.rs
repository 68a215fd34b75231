//! A room created with [`RoomKey::generate`], carried as an invite URL
//! and parsed back, must decrypt what it encrypted (spec §4.1, §6.2).

use meshrelay_crypto::{aead, Invite, RoomKey};

#[test]
fn invite_round_trip_carries_a_working_room_key() {
    let room_code = "AB12CD".to_string();
    let key = RoomKey::generate().expect("OS CSPRNG");
    let invite = Invite { room_code: room_code.clone(), key: key.clone() };

    let url = invite.to_url("meshrelay.example");
    let parsed = Invite::parse(&url).expect("invite URL round-trips");

    assert_eq!(parsed.room_code, room_code);
    let wire = aead::encrypt("hello from the other side", &key);
    let plaintext = aead::decrypt(&wire, &parsed.key).expect("parsed key decrypts sender's ciphertext");
    assert_eq!(plaintext, "hello from the other side");
}

/// A different room's key must not decrypt this room's ciphertext.
#[test]
fn invite_keys_do_not_cross_rooms() {
    let key_a = RoomKey::generate().unwrap();
    let key_b = RoomKey::generate().unwrap();
    let wire = aead::encrypt("room A's secret", &key_a);
    assert!(aead::decrypt(&wire, &key_b).is_none());
}
