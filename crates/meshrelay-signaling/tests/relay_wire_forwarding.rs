//! The relay forwards SDP/ICE blobs byte-for-byte (spec §4.3): an
//! `offer` a peer sends through [`ClientFrame::Offer`] must reach its
//! recipient as the identical opaque string inside
//! [`RelayFrame::Offer`], even though the relay itself never parses it.

use meshrelay_signaling::{ClientFrame, RelayFrame};

#[test]
fn relay_forwards_an_offer_blob_unchanged() {
    let outbound = ClientFrame::Offer {
        from: "alice-1".into(),
        to: "bob-1".into(),
        room_id: "AB12CD".into(),
        data: "v=0\r\no=- sdp-blob".into(),
    };
    let ClientFrame::Offer { data, .. } = &outbound else { unreachable!() };
    let forwarded = RelayFrame::Offer { from: "alice-1".into(), data: data.clone() };

    let wire = serde_json::to_string(&forwarded).unwrap();
    let decoded: RelayFrame = serde_json::from_str(&wire).unwrap();
    let RelayFrame::Offer { data: received, .. } = decoded else {
        panic!("expected an offer frame");
    };
    assert_eq!(received, "v=0\r\no=- sdp-blob");
}
