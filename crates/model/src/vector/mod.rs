//! RISC-V Vector configuration state.
//!
//! This module carries the dynamic vector CSR state that vset instructions
//! establish and every subsequent vector instruction is stamped with:
//! 1. **[`VectorConfig`]:** vl / sew / lmul / vta and the derived vlmax.
//! 2. **[`VectorMemConfig`]:** per-memop fracture bookkeeping for the VLSU.

/// Vector micro-op fracture machinery (register progressions per generator kind).
pub mod uop_gen;

use std::fmt;

/// Vector register length in bits.
pub const VLEN: u32 = 1024;

/// Snapshot of the vector configuration CSRs (vl, vtype).
///
/// Established by `vset{i}vl{i}` instructions at decode (or forwarded from
/// execute for blocking vsets) and stamped onto every vector instruction that
/// follows. Uops inherit their parent's config unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorConfig {
    sew: u32,
    lmul: u32,
    vl: u32,
    /// Vector tail agnostic: false = undisturbed, true = agnostic.
    vta: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            sew: 8,
            lmul: 1,
            vl: 16,
            vta: false,
        }
    }
}

impl VectorConfig {
    /// Creates a config, asserting the architectural bounds.
    ///
    /// # Panics
    ///
    /// Panics if `lmul > 8` or `vl > vlmax` — both indicate a malformed
    /// workload record that should have been rejected earlier.
    pub fn new(vl: u32, sew: u32, lmul: u32, vta: bool) -> Self {
        let config = Self {
            sew,
            lmul,
            vl,
            vta,
        };
        assert!(lmul <= 8, "LMUL ({lmul}) cannot be greater than 8");
        assert!(
            vl <= config.vlmax(),
            "VL ({vl}) cannot be greater than VLMAX ({})",
            config.vlmax()
        );
        config
    }

    /// Selected element width in bits.
    #[inline]
    pub fn sew(&self) -> u32 {
        self.sew
    }

    /// Register group multiplier.
    #[inline]
    pub fn lmul(&self) -> u32 {
        self.lmul
    }

    /// Active vector length in elements.
    #[inline]
    pub fn vl(&self) -> u32 {
        self.vl
    }

    /// Tail-agnostic flag.
    #[inline]
    pub fn vta(&self) -> bool {
        self.vta
    }

    /// Maximum vector length for this sew/lmul: `(VLEN / sew) * lmul`.
    #[inline]
    pub fn vlmax(&self) -> u32 {
        (VLEN / self.sew) * self.lmul
    }

    /// Replaces the active vector length, clamping to vlmax.
    pub fn set_vl(&mut self, vl: u32) {
        self.vl = vl.min(self.vlmax());
    }
}

impl fmt::Display for VectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e{}m{}{} vl: {} vlmax: {}",
            self.sew,
            self.lmul,
            if self.vta { "ta" } else { "" },
            self.vl,
            self.vlmax()
        )
    }
}

/// Addressing mode of a vector memory operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemAccessOrder {
    /// Consecutive elements, one request per cache line touched.
    #[default]
    UnitStride,
    /// Constant byte stride between elements, one request per element.
    Strided,
    /// Per-element index register, one request per element.
    Indexed,
}

/// Fracture bookkeeping for one vector memory uop.
///
/// Filled in when the VLSU accepts the uop; `completed` counts child memory
/// responses and the uop finishes when it reaches `total_mem_reqs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct VectorMemConfig {
    /// Effective element width in bits.
    pub eew: u32,
    /// Byte stride between elements (strided mode only).
    pub stride: u64,
    /// Addressing mode.
    pub mop: MemAccessOrder,
    /// Total child memory requests this uop fractures into.
    pub total_mem_reqs: u32,
    /// Child requests that have completed so far.
    pub completed: u32,
}

impl VectorMemConfig {
    /// Number of child requests for `vl` elements of `eew` bits.
    ///
    /// Unit-stride packs elements densely and issues one request per cache
    /// line; strided and indexed modes issue one request per element.
    pub fn required_requests(mop: MemAccessOrder, vl: u32, eew: u32, line_bits: u32) -> u32 {
        match mop {
            MemAccessOrder::UnitStride => (vl * eew).div_ceil(line_bits),
            MemAccessOrder::Strided | MemAccessOrder::Indexed => vl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlmax_formula() {
        let config = VectorConfig::new(256, 32, 4, false);
        assert_eq!(config.vlmax(), (1024 / 32) * 4);
        assert_eq!(config.vlmax(), 128);
    }

    #[test]
    fn test_lmul8_sew8_vlmax() {
        let config = VectorConfig::new(1024, 8, 8, false);
        assert_eq!(config.vlmax(), 1024);
    }

    #[test]
    #[should_panic(expected = "VL")]
    fn test_vl_beyond_vlmax_rejected() {
        let _ = VectorConfig::new(2048, 32, 4, false);
    }

    #[test]
    fn test_set_vl_clamps() {
        let mut config = VectorConfig::new(16, 32, 1, false);
        config.set_vl(4096);
        assert_eq!(config.vl(), config.vlmax());
    }

    #[test]
    fn test_unit_stride_request_count() {
        // 256 elements * 32 bits = 8192 bits; 512-bit lines -> 16 requests.
        let n = VectorMemConfig::required_requests(MemAccessOrder::UnitStride, 256, 32, 512);
        assert_eq!(n, 16);
    }

    #[test]
    fn test_strided_request_count_is_per_element() {
        let n = VectorMemConfig::required_requests(MemAccessOrder::Strided, 37, 64, 512);
        assert_eq!(n, 37);
    }
}
