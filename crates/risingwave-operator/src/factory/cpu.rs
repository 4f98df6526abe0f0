use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use snafu::{ResultExt, Snafu};

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("unsupported cpu unit in {value:?}, only plain cores and millicores are"))]
    UnsupportedUnit { value: String },

    #[snafu(display("invalid millicore quantity {value:?}"))]
    InvalidMillis {
        source: std::num::ParseIntError,
        value: String,
    },

    #[snafu(display("invalid core quantity {value:?}"))]
    InvalidCores {
        source: std::num::ParseFloatError,
        value: String,
    },
}

/// CPU amount with millicore precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuQuantity {
    millis: u64,
}

impl CpuQuantity {
    /// Whole cores, rounded up.
    pub fn ceil_cores(self) -> u64 {
        self.millis.div_ceil(1000)
    }
}

impl FromStr for CpuQuantity {
    type Err = Error;

    fn from_str(q: &str) -> Result<Self, Error> {
        match q.strip_suffix('m') {
            Some(millis) => Ok(Self {
                millis: millis.parse().context(InvalidMillisSnafu { value: q })?,
            }),
            None if q.chars().all(|c| c.is_ascii_digit() || c == '.') => {
                let cores: f64 = q.parse().context(InvalidCoresSnafu { value: q })?;
                Ok(Self {
                    millis: (cores * 1000.).ceil() as u64,
                })
            }
            None => UnsupportedUnitSnafu { value: q }.fail(),
        }
    }
}

impl TryFrom<&Quantity> for CpuQuantity {
    type Error = Error;

    fn try_from(q: &Quantity) -> Result<Self, Error> {
        q.0.parse()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("500m", 1)]
    #[case("1000m", 1)]
    #[case("1001m", 2)]
    #[case("2", 2)]
    #[case("1.5", 2)]
    #[case("0.1", 1)]
    fn ceil_cores(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<CpuQuantity>().unwrap().ceil_cores(), expected);
    }

    #[rstest]
    #[case("1k")]
    #[case("xm")]
    #[case("1..2")]
    fn invalid(#[case] input: &str) {
        assert!(input.parse::<CpuQuantity>().is_err());
    }
}
