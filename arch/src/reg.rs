use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Default,
    FromPrimitive,
    IntoPrimitive,
    EnumString,
    Display,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum Reg {
    #[default]
    X0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    X29,
    X30,
    X31,
}

impl Reg {
    /// Parses either the `xN` spelling or an ABI name (`sp`, `a0`, ...).
    pub fn parse(s: &str) -> Option<Reg> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(r) = lower.parse::<Reg>() {
            return Some(r);
        }
        crate::tables::REGISTER_NAMES
            .get(lower.as_str())
            .map(|&n| Reg::from(n as u8))
    }

    pub fn index(self) -> u32 {
        u8::from(self) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_both_spellings() {
        assert_eq!(Reg::parse("x7"), Some(Reg::X7));
        assert_eq!(Reg::parse("T2"), Some(Reg::X7));
        assert_eq!(Reg::parse("zero"), Some(Reg::X0));
        assert_eq!(Reg::parse("fp"), Some(Reg::X8));
        assert_eq!(Reg::parse("a7"), Some(Reg::X17));
        assert_eq!(Reg::parse("hoge"), None);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(Reg::X10.to_string(), "x10");
    }
}
