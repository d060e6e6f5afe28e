//! Fractional-percent matching shared by route fraction matches and fault
//! injection rates (section 4.A, 4.C).

use crate::model::{FractionDenominator, FractionalPercent};

#[derive(Debug, Clone, Copy)]
pub struct FractionMatcher {
    pub percent: FractionalPercent,
}

impl FractionMatcher {
    /// `rng` draws a uniform integer in `[0, bound)`. Matches when that
    /// draw is strictly less than the numerator.
    pub fn matches(&self, rng: &mut dyn FnMut(u32) -> u32) -> bool {
        fires(self.percent, rng)
    }
}

/// Shared fire/no-fire decision: draw uniform in `[0, denominator)`,
/// compare against the numerator. Used by both route fraction matching
/// and fault-injection rate decisions.
pub fn fires(percent: FractionalPercent, rng: &mut dyn FnMut(u32) -> u32) -> bool {
    let denominator = percent.denominator.value();
    if percent.numerator == 0 {
        return false;
    }
    if percent.numerator >= denominator {
        return true;
    }
    let draw = rng(denominator);
    draw < percent.numerator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_percent_never_fires() {
        let p = FractionalPercent { numerator: 0, denominator: FractionDenominator::Hundred };
        assert!(!fires(p, &mut |_| 0));
    }

    #[test]
    fn full_percent_always_fires() {
        let p = FractionalPercent { numerator: 100, denominator: FractionDenominator::Hundred };
        assert!(fires(p, &mut |_| 99));
    }

    #[test]
    fn draw_below_numerator_fires() {
        let p = FractionalPercent { numerator: 60, denominator: FractionDenominator::Hundred };
        assert!(fires(p, &mut |_| 50));
        assert!(!fires(p, &mut |_| 70));
    }

    #[test]
    fn empirical_rate_approaches_configured_percent() {
        let p = FractionalPercent { numerator: 3000, denominator: FractionDenominator::TenThousand };
        let mut rng = rand::thread_rng();
        use rand::Rng;
        let trials = 200_000;
        let fired = (0..trials)
            .filter(|_| fires(p, &mut |bound| rng.gen_range(0..bound)))
            .count();
        let rate = fired as f64 / trials as f64;
        assert!((rate - 0.30).abs() < 0.01, "rate was {rate}");
    }

    proptest::proptest! {
        #[test]
        fn fires_always_matches_the_draw_against_numerator(
            numerator in 0u32..200,
            denom_idx in 0u8..3,
            raw_draw in 0u32..1_000_000,
        ) {
            let denominator = match denom_idx {
                0 => FractionDenominator::Hundred,
                1 => FractionDenominator::TenThousand,
                _ => FractionDenominator::Million,
            };
            let bound = denominator.value();
            let draw = raw_draw % bound;
            let percent = FractionalPercent { numerator, denominator };
            let fired = fires(percent, &mut |_| draw);
            let expected = if numerator == 0 {
                false
            } else if numerator >= bound {
                true
            } else {
                draw < numerator
            };
            proptest::prop_assert_eq!(fired, expected);
        }
    }
}
