// src/financial.rs

/// Round a currency or quantity value to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Replacement Cost Value: quantity times unit price.
///
/// Defined for non-negative inputs only; callers validate before invoking.
pub fn rcv(quantity: f64, unit_price: f64) -> f64 {
    debug_assert!(quantity >= 0.0 && unit_price >= 0.0);
    round2(quantity * unit_price)
}

/// Depreciation amount from a whole-number percentage (e.g. 25 for 25%).
pub fn depreciation(rcv: f64, dep_percent: f64) -> f64 {
    debug_assert!(dep_percent >= 0.0);
    round2(rcv * dep_percent / 100.0)
}

/// Actual Cash Value: RCV minus the depreciation already taken.
pub fn acv(rcv: f64, depreciation_amount: f64) -> f64 {
    round2(rcv - depreciation_amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcv_is_quantity_times_price() {
        assert_eq!(rcv(2.5, 100.0), 250.0);
        assert_eq!(rcv(0.0, 55.0), 0.0);
    }

    #[test]
    fn depreciation_uses_whole_percent() {
        assert_eq!(depreciation(200.0, 25.0), 50.0);
        assert_eq!(depreciation(200.0, 0.0), 0.0);
    }

    #[test]
    fn acv_subtracts_depreciation() {
        assert_eq!(acv(250.0, 50.0), 200.0);
        assert_eq!(acv(250.0, 0.0), 250.0);
    }

    #[test]
    fn round2_half_cent() {
        assert_eq!(round2(10.005), 10.01);
        assert_eq!(round2(2.675000001), 2.68);
    }
}
