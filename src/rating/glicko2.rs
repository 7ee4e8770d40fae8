//! A [Glicko-2][1] implementation for whole-period replay.
//!
//! [1]: https://www.glicko.net/glicko/glicko2.pdf

use std::f64::consts::PI;

/// Conversion factor between the user-facing 1500-centered scale and the
/// internal Glicko-2 scale.
pub const SCALE: f64 = 173.7178;
pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_RD: f64 = 350.0;
pub const DEFAULT_VOLATILITY: f64 = 0.06;
/// Rating deviations never inflate past the starting uncertainty.
pub const MAX_RD: f64 = 350.0;
pub const CONVERGENCE_TOLERANCE: f64 = 1e-6;

/// A player's pre-period state, carried in both scales.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
    pub mu: f64,
    pub phi: f64,
}

impl Snapshot {
    pub fn new(rating: f64, rd: f64, volatility: f64) -> Self {
        Snapshot {
            rating,
            rd,
            volatility,
            mu: (rating - DEFAULT_RATING) / SCALE,
            phi: rd / SCALE,
        }
    }
}

/// One pairing inside a period: the opponent's pre-period snapshot and
/// the score against them (1.0 win, 0.0 loss).
#[derive(Clone, Copy, Debug)]
pub struct Pairing {
    pub opponent: Snapshot,
    pub score: f64,
}

/// A player's post-period state.
#[derive(Clone, Copy, Debug)]
pub struct Rated {
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
}

impl From<&Snapshot> for Rated {
    fn from(snapshot: &Snapshot) -> Self {
        Rated {
            rating: snapshot.rating,
            rd: snapshot.rd,
            volatility: snapshot.volatility,
        }
    }
}

/// Rates a player's performance over one period.
///
/// Every pairing is scored against the opponents' pre-period snapshots,
/// so the order players are updated in has no effect on the result.
pub fn rate(snapshot: &Snapshot, pairings: &[Pairing], tau: f64) -> Rated {
    if pairings.is_empty() {
        return snapshot.into();
    }

    let mu = snapshot.mu;
    let phi = snapshot.phi;
    let sigma = snapshot.volatility;

    // Step 3: estimate the variance of the rating from game outcomes.
    // Step 4: the estimated improvement, delta.
    let mut v_inv = 0.0;
    let mut delta_sum = 0.0;
    for pairing in pairings {
        let g_j = g(pairing.opponent.phi);
        let e = expectation(mu, pairing.opponent.mu, pairing.opponent.phi);
        v_inv += g_j * g_j * e * (1.0 - e);
        delta_sum += g_j * (pairing.score - e);
    }
    if v_inv == 0.0 {
        return snapshot.into();
    }

    let v = v_inv.recip();
    let delta = v * delta_sum;

    // Step 5: the new volatility, via the Illinois root find.
    let new_volatility = update_volatility(phi, sigma, delta, v, tau);

    // Steps 6 and 7: fold in the new volatility and finalize.
    let phi_star = (phi * phi + new_volatility * new_volatility).sqrt();
    let phi_prime = ((phi_star * phi_star).recip() + v.recip()).sqrt().recip();
    let mu_prime = mu + phi_prime * phi_prime * delta_sum;

    Rated {
        rating: mu_prime * SCALE + DEFAULT_RATING,
        rd: (phi_prime * SCALE).min(MAX_RD),
        volatility: new_volatility,
    }
}

/// The Glicko-2 g function, discounting an opponent by their deviation.
pub fn g(phi: f64) -> f64 {
    (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt().recip()
}

/// Expected score against an opponent at `(mu_j, phi_j)`.
pub fn expectation(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    (1.0 + f64::exp(-g(phi_j) * (mu - mu_j))).recip()
}

/// Finds the new volatility with the Illinois variant of regula falsi.
///
/// The initial bracket is `A = ln(sigma^2)` and `B = ln(delta^2 - phi^2 - v)`
/// when `delta^2 > phi^2 + v`, otherwise `A - k*tau` walking `k` up until
/// `f` turns negative.
pub fn update_volatility(phi: f64, sigma: f64, delta: f64, v: f64, tau: f64) -> f64 {
    let phi_squared = phi * phi;
    let delta_squared = delta * delta;
    let a = f64::ln(sigma * sigma);

    let f = |x: f64| {
        let exp_x = f64::exp(x);
        let numerator = exp_x * (delta_squared - phi_squared - v - exp_x);
        let denominator = 2.0 * (phi_squared + v + exp_x).powi(2);
        numerator / denominator - (x - a) / (tau * tau)
    };

    let mut lower = a;
    let mut upper = if delta_squared > phi_squared + v {
        f64::ln(delta_squared - phi_squared - v)
    } else {
        let mut k = 1.0;
        while f(a - k * tau) < 0.0 {
            k += 1.0;
        }
        a - k * tau
    };

    let mut f_lower = f(lower);
    let mut f_upper = f(upper);

    while (upper - lower).abs() > CONVERGENCE_TOLERANCE {
        let candidate = lower + (lower - upper) * f_lower / (f_upper - f_lower);
        let f_candidate = f(candidate);

        if f_candidate * f_upper < 0.0 {
            lower = upper;
            f_lower = f_upper;
        } else {
            f_lower /= 2.0;
        }

        upper = candidate;
        f_upper = f_candidate;
    }

    f64::exp(lower / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The worked example from the Glicko-2 paper.
    /// <https://www.glicko.net/glicko/glicko2.pdf>
    #[test]
    fn matches_the_published_example() {
        let player = Snapshot::new(1500.0, 200.0, 0.06);
        let pairings = [
            Pairing {
                opponent: Snapshot::new(1400.0, 30.0, 0.06),
                score: 1.0,
            },
            Pairing {
                opponent: Snapshot::new(1550.0, 100.0, 0.06),
                score: 0.0,
            },
            Pairing {
                opponent: Snapshot::new(1700.0, 300.0, 0.06),
                score: 0.0,
            },
        ];

        let rated = rate(&player, &pairings, 0.5);

        assert!((rated.rating - 1464.06).abs() < 0.01);
        assert!((rated.rd - 151.52).abs() < 0.01);
        assert!((rated.volatility - 0.05999).abs() < 0.0001);
    }

    #[test]
    fn no_pairings_leave_the_snapshot_unchanged() {
        let player = Snapshot::new(1612.0, 140.0, 0.059);
        let rated = rate(&player, &[], 0.5);

        assert_eq!(rated.rating, 1612.0);
        assert_eq!(rated.rd, 140.0);
        assert_eq!(rated.volatility, 0.059);
    }

    #[test]
    fn volatility_stays_put_for_an_expected_result() {
        // a strong favorite beating a weak opponent is no surprise
        let player = Snapshot::new(1800.0, 80.0, 0.06);
        let pairings = [Pairing {
            opponent: Snapshot::new(1400.0, 80.0, 0.06),
            score: 1.0,
        }];

        let rated = rate(&player, &pairings, 0.5);
        assert!((rated.volatility - 0.06).abs() < 1e-3);
    }

    #[test]
    fn large_surprises_take_the_wide_bracket() {
        // a huge upset makes delta^2 exceed phi^2 + v, so the upper
        // bracket starts at ln(delta^2 - phi^2 - v)
        let player = Snapshot::new(1500.0, 30.0, 0.06);
        let pairings = [Pairing {
            opponent: Snapshot::new(2200.0, 30.0, 0.06),
            score: 1.0,
        }];

        let rated = rate(&player, &pairings, 0.5);
        assert!(rated.volatility.is_finite());
        assert!(rated.volatility > 0.06);
        assert!(rated.rating > 1500.0);
    }

    #[test]
    fn expectation_is_half_for_equal_ratings() {
        let e = expectation(0.0, 0.0, 350.0 / SCALE);
        assert!((e - 0.5).abs() < 1e-12);
    }
}
