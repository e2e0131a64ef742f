use crate::error::{Result, StatelyError};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

/// Decimal suffixes and their power of ten
const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

const NANOS_PER_UNIT: u128 = 1_000_000_000;

/// Notation a quantity was written in; canonical output keeps it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Ki, Mi, Gi, ...
    BinarySI,
    /// n, u, m, k, M, G, ... or no suffix
    DecimalSI,
    /// 1e3, 5E-3
    DecimalExponent,
}

/// A non-negative Kubernetes quantity, held exactly in nano-units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedQuantity {
    nanos: u128,
    format: QuantityFormat,
}

impl ParsedQuantity {
    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Whole units, rounded up
    pub fn units(&self) -> u128 {
        self.nanos.div_ceil(NANOS_PER_UNIT)
    }

    /// The spelling the API server serializes this quantity as
    ///
    /// Binary quantities use the largest exact binary suffix ("1024Mi" is
    /// "1Gi", "1.5Gi" is "1536Mi") and fall back to decimal below 1Ki or for
    /// fractions. Decimal quantities use the largest exact power of 1000
    /// ("1000M" is "1G", "0.5" is "500m").
    pub fn canonical(&self) -> String {
        if self.nanos == 0 {
            return "0".to_string();
        }

        if self.format == QuantityFormat::BinarySI && self.nanos % NANOS_PER_UNIT == 0 {
            let units = self.nanos / NANOS_PER_UNIT;
            if units >= 1024 {
                return BINARY_SUFFIXES
                    .iter()
                    .rev()
                    .map(|(suffix, power)| (suffix, 1024u128.pow(*power)))
                    .find(|(_, unit)| units % unit == 0)
                    .map(|(suffix, unit)| format!("{}{}", units / unit, suffix))
                    .unwrap_or_else(|| units.to_string());
            }
        }

        let max_exponent = match self.format {
            QuantityFormat::DecimalExponent => i32::MAX,
            _ => 18,
        };
        let mut mantissa = self.nanos;
        let mut exponent = -9;
        while mantissa % 1000 == 0 && exponent + 3 <= max_exponent {
            mantissa /= 1000;
            exponent += 3;
        }

        match self.format {
            QuantityFormat::DecimalExponent if exponent == 0 => mantissa.to_string(),
            QuantityFormat::DecimalExponent => format!("{}e{}", mantissa, exponent),
            _ => {
                let suffix = DECIMAL_SUFFIXES
                    .iter()
                    .find(|(_, power)| *power == exponent)
                    .map(|(suffix, _)| *suffix)
                    .unwrap_or_default();
                format!("{}{}", mantissa, suffix)
            }
        }
    }
}

/// Parse a quantity string such as "1Gi", "500m", "1.5", "10G" or "1e3"
///
/// Negative values are rejected; fractions finer than a nano-unit round up.
pub fn parse_quantity(s: &str) -> Result<ParsedQuantity> {
    let s = s.trim();
    if s.is_empty() {
        return Err(StatelyError::invalid_quantity(s, "empty value"));
    }
    if s.starts_with('-') {
        return Err(StatelyError::invalid_quantity(s, "quantity must not be negative"));
    }

    let unsigned = s.strip_prefix('+').unwrap_or(s);
    let split = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(StatelyError::invalid_quantity(s, "missing numeric value"));
    }
    if frac_part.contains('.') {
        return Err(StatelyError::invalid_quantity(s, "more than one decimal point"));
    }

    let overflow = || StatelyError::invalid_quantity(s, "value overflows");
    let mut mantissa: u128 = 0;
    for digit in int_part.chars().chain(frac_part.chars()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(u128::from(digit as u8 - b'0')))
            .ok_or_else(overflow)?;
    }

    let (format, binary_power, decimal_power) = parse_suffix(s, suffix)?;

    mantissa = mantissa
        .checked_mul(1024u128.pow(binary_power))
        .ok_or_else(overflow)?;

    // Scale to nano-units: value = mantissa * 10^(decimal_power - frac_len)
    let frac_len = i32::try_from(frac_part.len()).map_err(|_| overflow())?;
    let scale = decimal_power
        .checked_add(9)
        .and_then(|p| p.checked_sub(frac_len))
        .ok_or_else(overflow)?;

    let nanos = if scale >= 0 {
        10u128
            .checked_pow(scale.unsigned_abs())
            .and_then(|factor| mantissa.checked_mul(factor))
            .ok_or_else(overflow)?
    } else {
        match 10u128.checked_pow(scale.unsigned_abs()) {
            Some(divisor) => mantissa.div_ceil(divisor),
            None => u128::from(mantissa > 0),
        }
    };

    Ok(ParsedQuantity { nanos, format })
}

fn parse_suffix(s: &str, suffix: &str) -> Result<(QuantityFormat, u32, i32)> {
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(b, _)| *b == suffix) {
        return Ok((QuantityFormat::BinarySI, *power, 0));
    }
    if let Some((_, power)) = DECIMAL_SUFFIXES.iter().find(|(d, _)| *d == suffix) {
        return Ok((QuantityFormat::DecimalSI, 0, *power));
    }

    // "E" alone is exa; "E3" or "e-3" is an exponent
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .and_then(|exp| exp.parse::<i32>().ok());
    match exponent {
        Some(exp) => Ok((QuantityFormat::DecimalExponent, 0, exp)),
        None => Err(StatelyError::invalid_quantity(
            s,
            format!("unknown suffix '{}'", suffix),
        )),
    }
}

/// Rewrite a quantity in the API server's canonical spelling
pub fn canonical_quantity(quantity: &Quantity) -> Result<Quantity> {
    Ok(Quantity(parse_quantity(&quantity.0)?.canonical()))
}

/// Validate a storage size and return it in canonical form
///
/// The canonical spelling is what the API server echoes back, so the
/// synthesized volume claim compares equal to the stored one.
pub fn storage_quantity(s: &str) -> Result<Quantity> {
    let parsed = parse_quantity(s)?;
    if u64::try_from(parsed.units()).is_err() {
        return Err(StatelyError::invalid_quantity(s, "storage size exceeds 2^64 bytes"));
    }
    Ok(Quantity(parsed.canonical()))
}

/// Canonicalize every limit and request of a container
pub fn canonical_resources(resources: &ResourceRequirements) -> Result<ResourceRequirements> {
    let mut canonical = resources.clone();
    for map in [canonical.limits.as_mut(), canonical.requests.as_mut()]
        .into_iter()
        .flatten()
    {
        for quantity in map.values_mut() {
            *quantity = canonical_quantity(quantity)?;
        }
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn canonical(s: &str) -> String {
        parse_quantity(s).unwrap().canonical()
    }

    #[test]
    fn test_binary_quantities() {
        assert_eq!(canonical("1Gi"), "1Gi");
        assert_eq!(canonical("1024Mi"), "1Gi");
        assert_eq!(canonical("1.5Gi"), "1536Mi");
        assert_eq!(canonical("2048Ki"), "2Mi");
        assert_eq!(canonical("3Ti"), "3Ti");
        assert_eq!(parse_quantity("1Gi").unwrap().units(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_small_binary_falls_back_to_decimal() {
        assert_eq!(canonical("0.5Ki"), "512");
        assert_eq!(canonical("1.5Ki"), "1536");
    }

    #[test]
    fn test_decimal_quantities() {
        assert_eq!(canonical("1000M"), "1G");
        assert_eq!(canonical("500M"), "500M");
        assert_eq!(canonical("2000"), "2k");
        assert_eq!(canonical("1024"), "1024");
        assert_eq!(canonical("0.5"), "500m");
        assert_eq!(canonical("1000m"), "1");
        assert_eq!(canonical("0.0001"), "100u");
        assert_eq!(canonical("+10G"), "10G");
        assert_eq!(canonical("0Gi"), "0");
    }

    #[test]
    fn test_exponent_quantities() {
        assert_eq!(canonical("1e3"), "1e3");
        assert_eq!(canonical("1000e3"), "1e6");
        assert_eq!(canonical("5E-3"), "5e-3");
        assert_eq!(canonical("12e0"), "12");
        assert_eq!(parse_quantity("1E").unwrap().format(), QuantityFormat::DecimalSI);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("Gi").is_err());
        assert!(parse_quantity("ten").is_err());
        assert!(parse_quantity("1Qi").is_err());
        assert!(parse_quantity("-1Gi").is_err());
        assert!(parse_quantity("1.2.3").is_err());
        assert!(parse_quantity("1 Gi").is_err());
    }

    #[test]
    fn test_storage_quantity_is_canonical() {
        assert_eq!(storage_quantity("1024Mi").unwrap().0, "1Gi");
        assert_eq!(storage_quantity(" 10Gi ").unwrap().0, "10Gi");

        let err = storage_quantity("lots").unwrap_err();
        assert!(matches!(err, StatelyError::InvalidQuantity { .. }));
        assert!(storage_quantity("20Ei").is_err());
    }

    #[test]
    fn test_canonical_resources() {
        let resources = ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("2000m".to_string())),
                ("memory".to_string(), Quantity("2048Mi".to_string())),
            ])),
            requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("0.5".to_string()))])),
            ..Default::default()
        };

        let canonical = canonical_resources(&resources).unwrap();
        let limits = canonical.limits.unwrap();
        assert_eq!(limits["cpu"].0, "2");
        assert_eq!(limits["memory"].0, "2Gi");
        assert_eq!(canonical.requests.unwrap()["cpu"].0, "500m");

        let bad = ResourceRequirements {
            requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("fast".to_string()))])),
            ..Default::default()
        };
        assert!(canonical_resources(&bad).is_err());
    }
}
