use grix_hash::hex::hex_to_string;
use grix_hash::Oid;
use proptest::prelude::*;

proptest! {
    #[test]
    fn parse_hex_is_identity(raw in prop::array::uniform20(any::<u8>())) {
        let hex = hex_to_string(&raw);
        prop_assert_eq!(hex.len(), 40);
        prop_assert!(hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
        let oid = Oid::from_hex(&hex).unwrap();
        prop_assert_eq!(oid.as_bytes(), &raw);
    }

    #[test]
    fn every_prefix_of_an_oid_matches_it(
        raw in prop::array::uniform20(any::<u8>()),
        len in 4usize..=40,
    ) {
        let oid = Oid::from_bytes(&raw).unwrap();
        let hex = oid.to_hex();
        let (short, nybbles) = Oid::from_hex_prefix(&hex[..len]).unwrap();
        prop_assert_eq!(nybbles, len);
        prop_assert!(short.matches_prefix(&oid, nybbles));
    }
}
