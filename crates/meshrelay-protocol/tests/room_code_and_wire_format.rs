//! `new_room_code` must always be usable as a `ClientFrame::Join`
//! `room_id` and as an invite URL path segment: six characters drawn
//! from the spec's unambiguous alphabet, never containing characters a
//! URL query parameter would need to escape (spec §3, §6.2).

use meshrelay_protocol::new_room_code;

#[test]
fn room_codes_are_url_safe_and_six_characters() {
    for _ in 0..200 {
        let code = new_room_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!code.contains(['0', '1', 'I', 'O']), "code {code} uses an excluded look-alike character");
    }
}
