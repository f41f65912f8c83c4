//! Hexadecimal port mask parsing

use crate::{
    config::MAX_PORTS,
    error::{DistError, Result},
};

use super::PortId;

/// Turn a hex port mask (`"0x5"`, `"3"`) into ordered port ids
///
/// Every selected port must be in `available`. An empty mask is rejected.
pub fn parse_portmask(mask: &str, available: &[PortId]) -> Result<Vec<PortId>> {
    let trimmed = mask.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bits = u64::from_str_radix(digits, 16).map_err(|e| {
        DistError::invalid_parameter("portmask", format!("'{}' is not a hex mask: {}", mask, e))
    })?;
    if bits == 0 {
        return Err(DistError::invalid_parameter(
            "portmask",
            "Mask selects no ports",
        ));
    }

    let mut ports = Vec::new();
    for bit in 0..u64::BITS as PortId {
        if bits & (1u64 << bit) == 0 {
            continue;
        }
        if !available.contains(&bit) {
            return Err(DistError::PortUnavailable { port: bit });
        }
        ports.push(bit);
    }

    if ports.len() > MAX_PORTS {
        return Err(DistError::invalid_parameter(
            "portmask",
            format!("{} ports selected, at most {} supported", ports.len(), MAX_PORTS),
        ));
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_portmask() {
        let available: Vec<PortId> = (0..4).collect();
        assert_eq!(parse_portmask("0x5", &available).unwrap(), vec![0, 2]);
        assert_eq!(parse_portmask("F", &available).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_portmask(" 1 ", &available).unwrap(), vec![0]);
    }

    #[test]
    fn test_parse_portmask_rejects() {
        let available: Vec<PortId> = (0..2).collect();
        assert!(parse_portmask("0", &available).is_err());
        assert!(parse_portmask("zz", &available).is_err());
        assert!(parse_portmask("", &available).is_err());
        assert!(matches!(
            parse_portmask("0x4", &available),
            Err(DistError::PortUnavailable { port: 2 })
        ));
    }
}
