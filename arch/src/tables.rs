use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::reg::Reg;

/// ABI register names in index order; `x8` also answers to `fp`.
pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Lowercased register spellings to register index. Contains both the `xN`
/// names and the ABI names.
pub static REGISTER_NAMES: Lazy<HashMap<String, u32>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (i, name) in ABI_NAMES.iter().enumerate() {
        map.insert(name.to_string(), i as u32);
        map.insert(Reg::from(i as u8).to_string(), i as u32);
    }
    map.insert("fp".to_string(), Reg::X8.index());
    map
});

/// Lowercased macro spellings to their expansion. ABI register names expand
/// to the `xN` spelling; `nop` expands to a whole instruction.
pub static MACROS: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (i, name) in ABI_NAMES.iter().enumerate() {
        map.insert(name.to_string(), Reg::from(i as u8).to_string());
    }
    map.insert("fp".to_string(), Reg::X8.to_string());
    map.insert("nop".to_string(), "addi x0, x0, 0".to_string());
    map
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_names_cover_all_registers() {
        assert_eq!(REGISTER_NAMES["zero"], 0);
        assert_eq!(REGISTER_NAMES["ra"], 1);
        assert_eq!(REGISTER_NAMES["sp"], 2);
        assert_eq!(REGISTER_NAMES["gp"], 3);
        assert_eq!(REGISTER_NAMES["tp"], 4);
        assert_eq!(REGISTER_NAMES["fp"], 8);
        assert_eq!(REGISTER_NAMES["s0"], 8);
        assert_eq!(REGISTER_NAMES["a0"], 10);
        assert_eq!(REGISTER_NAMES["s11"], 27);
        assert_eq!(REGISTER_NAMES["t6"], 31);
        assert_eq!(REGISTER_NAMES["x31"], 31);
        assert_eq!(REGISTER_NAMES.len(), 65);
    }

    #[test]
    fn macros_expand() {
        assert_eq!(MACROS["sp"], "x2");
        assert_eq!(MACROS["fp"], "x8");
        assert_eq!(MACROS["nop"], "addi x0, x0, 0");
        assert!(MACROS.get("x2").is_none());
    }
}
