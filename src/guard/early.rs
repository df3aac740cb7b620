use std::time::Duration;

/// Hard refresh-ahead threshold: remaining TTL below `fraction` of the original TTL.
pub fn should_refresh_ahead(remaining: Duration, original_ttl: Duration, fraction: f64) -> bool {
    remaining.as_secs_f64() < original_ttl.as_secs_f64() * fraction
}

/// Probabilistic early expiration (XFetch).
///
/// Refresh when `remaining < -beta * base_ttl * ln(u)` for a fresh uniform draw
/// `u` in `(0, 1]`. Larger `beta` refreshes earlier; callers sharing a key spread
/// their refreshes over the lifetime of the entry instead of all missing at once.
pub fn should_expire_early(remaining: Duration, base_ttl: Duration, beta: f64) -> bool {
    // fastrand::f64 is in [0, 1)
    should_expire_early_with(remaining, base_ttl, beta, 1.0 - fastrand::f64())
}

/// [`should_expire_early`] with an explicit draw `u`.
pub fn should_expire_early_with(remaining: Duration, base_ttl: Duration, beta: f64, u: f64) -> bool {
    if !(u > 0.0 && u <= 1.0) {
        return false;
    }
    let gap = -beta * base_ttl.as_secs_f64() * u.ln();
    remaining.as_secs_f64() < gap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_ahead_threshold() {
        let ttl = Duration::from_secs(100);
        assert!(should_refresh_ahead(Duration::from_secs(19), ttl, 0.2));
        assert!(!should_refresh_ahead(Duration::from_secs(20), ttl, 0.2));
        assert!(!should_refresh_ahead(Duration::from_secs(90), ttl, 0.2));
    }

    #[test]
    fn test_early_expiration_curve() {
        let ttl = Duration::from_secs(60);
        // u = 1 never refreshes early
        assert!(!should_expire_early_with(Duration::from_millis(1), ttl, 1.0, 1.0));
        // -ln(0.5) * 60 ~= 41.6s
        assert!(should_expire_early_with(Duration::from_secs(40), ttl, 1.0, 0.5));
        assert!(!should_expire_early_with(Duration::from_secs(45), ttl, 1.0, 0.5));
        // beta scales the horizon
        assert!(should_expire_early_with(Duration::from_secs(45), ttl, 2.0, 0.5));
        assert!(!should_expire_early_with(Duration::from_secs(1), ttl, 1.0, 0.0));
    }

    #[test]
    fn test_fresh_entries_rarely_refresh() {
        let ttl = Duration::from_secs(60);
        let early = (0..1000)
            .filter(|_| should_expire_early(ttl, ttl, 1.0))
            .count();
        // P(-ln u > 1) = e^-1, about 368 of 1000
        assert!(early > 250 && early < 500, "{early}");
        let near_expiry = (0..1000)
            .filter(|_| should_expire_early(Duration::from_millis(600), ttl, 1.0))
            .count();
        assert!(near_expiry > 950, "{near_expiry}");
    }
}
