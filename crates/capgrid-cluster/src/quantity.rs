//! CPU quantity parsing.
//!
//! The metrics API reports usage with a unit suffix (`n` nanocores, `u`
//! microcores, `m` millicores) while node capacity is usually a bare core
//! count. Both are normalised to nanocores before dividing.

use crate::error::{ClusterError, ClusterResult};

const NANOS_PER_CORE: f64 = 1e9;

/// Parse a CPU quantity into nanocores.
pub fn parse_cpu_nanos(quantity: &str) -> ClusterResult<f64> {
    let q = quantity.trim();
    let (digits, scale) = if let Some(n) = q.strip_suffix('n') {
        (n, 1.0)
    } else if let Some(u) = q.strip_suffix('u') {
        (u, 1e3)
    } else if let Some(m) = q.strip_suffix('m') {
        (m, 1e6)
    } else {
        (q, NANOS_PER_CORE)
    };

    let value: f64 = digits
        .parse()
        .map_err(|_| ClusterError::InvalidQuantity(quantity.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ClusterError::InvalidQuantity(quantity.to_string()));
    }
    Ok(value * scale)
}

/// Utilization percentage from a usage and a capacity quantity.
pub fn utilization_percent(usage: &str, capacity: &str) -> ClusterResult<f64> {
    let used = parse_cpu_nanos(usage)?;
    let total = parse_cpu_nanos(capacity)?;
    if total <= 0.0 {
        return Err(ClusterError::InvalidQuantity(capacity.to_string()));
    }
    Ok(used / total * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_normalise_to_nanocores() {
        assert_eq!(parse_cpu_nanos("1500000000n").unwrap(), 1.5e9);
        assert_eq!(parse_cpu_nanos("1500000u").unwrap(), 1.5e9);
        assert_eq!(parse_cpu_nanos("1500m").unwrap(), 1.5e9);
        assert_eq!(parse_cpu_nanos("4").unwrap(), 4e9);
    }

    #[test]
    fn nano_and_micro_usage_agree() {
        let a = utilization_percent("2000000000n", "4").unwrap();
        let b = utilization_percent("2000000u", "4").unwrap();
        assert!((a - 50.0).abs() < 1e-9);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn invalid_quantities_rejected() {
        assert!(parse_cpu_nanos("abc").is_err());
        assert!(parse_cpu_nanos("12Gi").is_err());
        assert!(parse_cpu_nanos("-5n").is_err());
        assert!(utilization_percent("100n", "0").is_err());
    }
}
