use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chime_clock::{mock_clock, ClockConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // A widened clock reports exactly the total number of ticks advanced,
    // no matter how the advancement is chunked relative to the device width.
    #[test]
    fn widened_readings_equal_the_total_advanced(
        width in 3u32..=16,
        steps in prop::collection::vec(0u32..5_000, 1..64),
    ) {
        let (clock, mock) = mock_clock(width, ClockConfig::default());
        let mut total: u32 = 0;
        for step in steps {
            mock.advance(step);
            total = total.wrapping_add(step);
            prop_assert_eq!(clock.now(), total);
        }
    }

    #[test]
    fn raw_readings_wrap_with_the_counter(
        width in 3u32..=16,
        steps in prop::collection::vec(0u32..5_000, 1..64),
    ) {
        let (clock, mock) = mock_clock(width, ClockConfig {
            widen: false,
            ..ClockConfig::default()
        });
        let mask = (1u32 << width) - 1;
        let mut total: u32 = 0;
        for step in steps {
            mock.advance(step);
            total = total.wrapping_add(step);
            prop_assert_eq!(clock.now(), total & mask);
        }
    }

    #[test]
    fn alarms_fire_at_their_exact_offset(
        width in 4u32..=12,
        offset in 1u32..20_000,
    ) {
        let (clock, mock) = mock_clock(width, ClockConfig::default());
        let fired_at = Arc::new(AtomicU32::new(u32::MAX));
        let sink_fired = Arc::clone(&fired_at);
        let alarm = clock.create_alarm(move |clock| {
            sink_fired.store(clock.now(), Ordering::SeqCst);
        });

        clock.arm(alarm, offset);
        mock.advance(offset - 1);
        prop_assert_eq!(fired_at.load(Ordering::SeqCst), u32::MAX);
        prop_assert!(clock.is_armed(alarm));

        mock.advance(1);
        prop_assert_eq!(fired_at.load(Ordering::SeqCst), offset);
        prop_assert!(!clock.is_armed(alarm));
    }
}
