use proptest::prelude::*;
use sed_range::opal::{self, MAX_KEY_LEN};
use sed_range::secure::live_buffers;
use sed_range::sim::SimulatedDrive;
use sed_range::status::Status;
use sed_range::ErrorKind;

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    #[test]
    fn oversized_keys_are_rejected_before_any_call(
        extra in 1usize..64,
        segment in 1u32..=8,
    ) {
        let drive = SimulatedDrive::new("prop0");
        let key = vec![0x5Au8; MAX_KEY_LEN + extra];
        prop_assert_eq!(opal::unlock(&drive, segment, &key).unwrap_err().kind(), ErrorKind::Invalid);
        prop_assert_eq!(
            opal::setup_range(&drive, &key, 0, 1024, segment, b"admin").unwrap_err().kind(),
            ErrorKind::Invalid
        );
        prop_assert_eq!(opal::factory_reset(&drive, &key).unwrap_err().kind(), ErrorKind::Invalid);
        prop_assert!(drive.calls().is_empty());
    }

    #[test]
    fn out_of_range_segments_are_invalid(segment in prop_oneof![Just(0u32), 9u32..]) {
        let drive = SimulatedDrive::new("prop1");
        prop_assert_eq!(opal::lock(&drive, segment).unwrap_err().kind(), ErrorKind::Invalid);
        prop_assert_eq!(opal::reset_segment(&drive, segment, b"admin").unwrap_err().kind(), ErrorKind::Invalid);
        prop_assert!(drive.calls().is_empty());
    }

    #[test]
    fn any_key_provisions_and_unlocks(
        key in proptest::collection::vec(any::<u8>(), 1..=MAX_KEY_LEN),
        segment in 1u32..=8,
        start in 0u64..1024,
        length in 1u64..1024,
    ) {
        let drive = SimulatedDrive::new("prop2");
        opal::setup_range(&drive, &key, start, length, segment, b"admin").unwrap();
        opal::unlock(&drive, segment, &key).unwrap();
        opal::lock(&drive, segment).unwrap();
        prop_assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn status_text_never_panics(raw in any::<i32>()) {
        let st = Status::from_raw(raw);
        prop_assert!(!st.text().is_empty());
    }
}
