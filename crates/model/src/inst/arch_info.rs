//! Static per-mnemonic microarchitecture data.
//!
//! The external decode facade normally supplies this from microarchitecture
//! description files; here a built-in table covers the modeled subset. For
//! each mnemonic it records the execution pipe, latency, and vector uop
//! generation type.

use crate::inst::{TargetPipe, UopGenType};

/// Static information about one mnemonic.
#[derive(Clone, Copy, Debug)]
pub struct ArchInfo {
    /// Instruction mnemonic as it appears in workload files.
    pub mnemonic: &'static str,
    /// Execution pipe target.
    pub pipe: TargetPipe,
    /// Execute latency in cycles.
    pub latency: u64,
    /// Vector uop generation type.
    pub uop_gen: UopGenType,
}

const fn info(
    mnemonic: &'static str,
    pipe: TargetPipe,
    latency: u64,
    uop_gen: UopGenType,
) -> ArchInfo {
    ArchInfo {
        mnemonic,
        pipe,
        latency,
        uop_gen,
    }
}

/// The built-in microarchitecture table.
///
/// Latencies follow the shipped medium-core description: single-cycle integer
/// ALU, 3-cycle multiply, long iterative divide, pipelined FP.
pub const ARCH_TABLE: &[ArchInfo] = &[
    // Integer ALU
    info("add", TargetPipe::Int, 1, UopGenType::None),
    info("addi", TargetPipe::Int, 1, UopGenType::None),
    info("addw", TargetPipe::Int, 1, UopGenType::None),
    info("sub", TargetPipe::Int, 1, UopGenType::None),
    info("and", TargetPipe::Int, 1, UopGenType::None),
    info("andi", TargetPipe::Int, 1, UopGenType::None),
    info("or", TargetPipe::Int, 1, UopGenType::None),
    info("ori", TargetPipe::Int, 1, UopGenType::None),
    info("xor", TargetPipe::Int, 1, UopGenType::None),
    info("xori", TargetPipe::Int, 1, UopGenType::None),
    info("sll", TargetPipe::Int, 1, UopGenType::None),
    info("slli", TargetPipe::Int, 1, UopGenType::None),
    info("srl", TargetPipe::Int, 1, UopGenType::None),
    info("srli", TargetPipe::Int, 1, UopGenType::None),
    info("sra", TargetPipe::Int, 1, UopGenType::None),
    info("srai", TargetPipe::Int, 1, UopGenType::None),
    info("slt", TargetPipe::Int, 1, UopGenType::None),
    info("slti", TargetPipe::Int, 1, UopGenType::None),
    info("sltu", TargetPipe::Int, 1, UopGenType::None),
    info("lui", TargetPipe::Int, 1, UopGenType::None),
    info("auipc", TargetPipe::Int, 1, UopGenType::None),
    info("nop", TargetPipe::Int, 1, UopGenType::None),
    // Integer multiply/divide
    info("mul", TargetPipe::Mul, 3, UopGenType::None),
    info("mulh", TargetPipe::Mul, 3, UopGenType::None),
    info("mulhu", TargetPipe::Mul, 3, UopGenType::None),
    info("mulw", TargetPipe::Mul, 3, UopGenType::None),
    info("div", TargetPipe::Div, 23, UopGenType::None),
    info("divu", TargetPipe::Div, 23, UopGenType::None),
    info("rem", TargetPipe::Div, 23, UopGenType::None),
    info("remu", TargetPipe::Div, 23, UopGenType::None),
    // Branches and jumps
    info("beq", TargetPipe::Br, 1, UopGenType::None),
    info("bne", TargetPipe::Br, 1, UopGenType::None),
    info("blt", TargetPipe::Br, 1, UopGenType::None),
    info("bge", TargetPipe::Br, 1, UopGenType::None),
    info("bltu", TargetPipe::Br, 1, UopGenType::None),
    info("bgeu", TargetPipe::Br, 1, UopGenType::None),
    info("jal", TargetPipe::Br, 1, UopGenType::None),
    info("jalr", TargetPipe::Br, 1, UopGenType::None),
    // Scalar memory
    info("lb", TargetPipe::Lsu, 1, UopGenType::None),
    info("lbu", TargetPipe::Lsu, 1, UopGenType::None),
    info("lh", TargetPipe::Lsu, 1, UopGenType::None),
    info("lhu", TargetPipe::Lsu, 1, UopGenType::None),
    info("lw", TargetPipe::Lsu, 1, UopGenType::None),
    info("lwu", TargetPipe::Lsu, 1, UopGenType::None),
    info("ld", TargetPipe::Lsu, 1, UopGenType::None),
    info("sb", TargetPipe::Lsu, 1, UopGenType::None),
    info("sh", TargetPipe::Lsu, 1, UopGenType::None),
    info("sw", TargetPipe::Lsu, 1, UopGenType::None),
    info("sd", TargetPipe::Lsu, 1, UopGenType::None),
    info("flw", TargetPipe::Lsu, 1, UopGenType::None),
    info("fld", TargetPipe::Lsu, 1, UopGenType::None),
    info("fsw", TargetPipe::Lsu, 1, UopGenType::None),
    info("fsd", TargetPipe::Lsu, 1, UopGenType::None),
    // Floating point
    info("fadd.s", TargetPipe::FaddSub, 3, UopGenType::None),
    info("fadd.d", TargetPipe::FaddSub, 3, UopGenType::None),
    info("fsub.s", TargetPipe::FaddSub, 3, UopGenType::None),
    info("fsub.d", TargetPipe::FaddSub, 3, UopGenType::None),
    info("fmul.s", TargetPipe::Float, 4, UopGenType::None),
    info("fmul.d", TargetPipe::Float, 4, UopGenType::None),
    info("fmadd.s", TargetPipe::Fmac, 5, UopGenType::None),
    info("fmadd.d", TargetPipe::Fmac, 5, UopGenType::None),
    info("fmsub.s", TargetPipe::Fmac, 5, UopGenType::None),
    info("fnmadd.d", TargetPipe::Fmac, 5, UopGenType::None),
    info("fdiv.s", TargetPipe::Float, 16, UopGenType::None),
    info("fdiv.d", TargetPipe::Float, 16, UopGenType::None),
    info("fsqrt.d", TargetPipe::Float, 16, UopGenType::None),
    info("fmin.d", TargetPipe::Float, 2, UopGenType::None),
    info("fmax.d", TargetPipe::Float, 2, UopGenType::None),
    info("fcvt.s.w", TargetPipe::I2f, 2, UopGenType::None),
    info("fcvt.d.l", TargetPipe::I2f, 2, UopGenType::None),
    info("fcvt.w.s", TargetPipe::F2i, 2, UopGenType::None),
    info("fcvt.l.d", TargetPipe::F2i, 2, UopGenType::None),
    info("fmv.x.d", TargetPipe::F2i, 1, UopGenType::None),
    info("fmv.d.x", TargetPipe::I2f, 1, UopGenType::None),
    // System — straight to retire
    info("ecall", TargetPipe::Rob, 1, UopGenType::None),
    info("ebreak", TargetPipe::Rob, 1, UopGenType::None),
    info("fence", TargetPipe::Rob, 1, UopGenType::None),
    info("fence.i", TargetPipe::Rob, 1, UopGenType::None),
    info("wfi", TargetPipe::Rob, 1, UopGenType::None),
    info("csrrw", TargetPipe::Sys, 1, UopGenType::None),
    info("csrrs", TargetPipe::Sys, 1, UopGenType::None),
    info("csrrc", TargetPipe::Sys, 1, UopGenType::None),
    // Vector configuration
    info("vsetvl", TargetPipe::Vset, 1, UopGenType::None),
    info("vsetvli", TargetPipe::Vset, 1, UopGenType::None),
    info("vsetivli", TargetPipe::Vset, 1, UopGenType::None),
    // Vector integer
    info("vadd.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vadd.vx", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vadd.vi", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vsub.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vand.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vor.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vxor.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vsll.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vsrl.vv", TargetPipe::Vint, 1, UopGenType::Elementwise),
    info("vmseq.vv", TargetPipe::Vint, 1, UopGenType::SingleDest),
    info("vmslt.vv", TargetPipe::Vint, 1, UopGenType::SingleDest),
    info("viota.m", TargetPipe::Vmask, 1, UopGenType::SingleSrc),
    info("vid.v", TargetPipe::Vmask, 1, UopGenType::SingleSrc),
    info("vmand.mm", TargetPipe::Vmask, 1, UopGenType::Elementwise),
    info("vzext.vf2", TargetPipe::Vint, 1, UopGenType::IntExt),
    info("vzext.vf4", TargetPipe::Vint, 1, UopGenType::IntExt),
    info("vzext.vf8", TargetPipe::Vint, 1, UopGenType::IntExt),
    info("vsext.vf2", TargetPipe::Vint, 1, UopGenType::IntExt),
    info("vsext.vf4", TargetPipe::Vint, 1, UopGenType::IntExt),
    info("vsext.vf8", TargetPipe::Vint, 1, UopGenType::IntExt),
    // Vector multiply / MAC
    info("vmul.vv", TargetPipe::Vmul, 3, UopGenType::Elementwise),
    info("vmulh.vv", TargetPipe::Vmul, 3, UopGenType::Elementwise),
    info("vwmul.vv", TargetPipe::Vmul, 3, UopGenType::Widening),
    info("vwaddu.vv", TargetPipe::Vint, 1, UopGenType::Widening),
    info("vwaddu.wv", TargetPipe::Vint, 1, UopGenType::WideningMixed),
    info("vwsubu.wv", TargetPipe::Vint, 1, UopGenType::WideningMixed),
    info("vmacc.vv", TargetPipe::Vmul, 3, UopGenType::Mac),
    info("vnmsac.vv", TargetPipe::Vmul, 3, UopGenType::Mac),
    info("vwmacc.vv", TargetPipe::Vmul, 3, UopGenType::MacWide),
    info("vdiv.vv", TargetPipe::Vdiv, 23, UopGenType::Elementwise),
    info("vrem.vv", TargetPipe::Vdiv, 23, UopGenType::Elementwise),
    // Vector fixed point
    info("vnclip.wv", TargetPipe::Vfixed, 2, UopGenType::Narrowing),
    info("vnclipu.wv", TargetPipe::Vfixed, 2, UopGenType::Narrowing),
    info("vsaddu.vv", TargetPipe::Vfixed, 1, UopGenType::Elementwise),
    // Vector reductions
    info("vredsum.vs", TargetPipe::Vint, 2, UopGenType::Reduction),
    info("vredmax.vs", TargetPipe::Vint, 2, UopGenType::Reduction),
    info("vwredsum.vs", TargetPipe::Vint, 2, UopGenType::ReductionWide),
    info("vwredsumu.vs", TargetPipe::Vint, 2, UopGenType::ReductionWide),
    // Vector float
    info("vfadd.vv", TargetPipe::Vfloat, 3, UopGenType::Elementwise),
    info("vfsub.vv", TargetPipe::Vfloat, 3, UopGenType::Elementwise),
    info("vfmul.vv", TargetPipe::Vfmul, 4, UopGenType::Elementwise),
    info("vfmacc.vv", TargetPipe::Vfmul, 5, UopGenType::Mac),
    info("vfdiv.vv", TargetPipe::Vfdiv, 16, UopGenType::Elementwise),
    // Vector permutation
    info("vslide1up.vx", TargetPipe::Vint, 1, UopGenType::Slide1Up),
    info("vslide1down.vx", TargetPipe::Vint, 1, UopGenType::Slide1Down),
    info("vmv1r.v", TargetPipe::Vint, 1, UopGenType::WholeReg),
    info("vmv2r.v", TargetPipe::Vint, 1, UopGenType::WholeReg),
    info("vmv4r.v", TargetPipe::Vint, 1, UopGenType::WholeReg),
    info("vmv8r.v", TargetPipe::Vint, 1, UopGenType::WholeReg),
    // Vector memory
    info("vle8.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vle16.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vle32.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vle64.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vse8.v", TargetPipe::Vstore, 1, UopGenType::Elementwise),
    info("vse16.v", TargetPipe::Vstore, 1, UopGenType::Elementwise),
    info("vse32.v", TargetPipe::Vstore, 1, UopGenType::Elementwise),
    info("vse64.v", TargetPipe::Vstore, 1, UopGenType::Elementwise),
    info("vlse32.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vlse64.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vluxei32.v", TargetPipe::Vload, 1, UopGenType::Elementwise),
    info("vsuxei32.v", TargetPipe::Vstore, 1, UopGenType::Elementwise),
    info("vlseg2e32.v", TargetPipe::Vload, 1, UopGenType::WholeReg),
    info("vlseg4e32.v", TargetPipe::Vload, 1, UopGenType::WholeReg),
];

/// Looks up the static data for a mnemonic.
pub fn lookup(mnemonic: &str) -> Option<&'static ArchInfo> {
    ARCH_TABLE.iter().find(|e| e.mnemonic == mnemonic)
}

/// Extension factor for vzext/vsext mnemonics (2, 4, or 8).
pub fn int_ext_factor(mnemonic: &str) -> Option<u32> {
    match mnemonic {
        "vzext.vf2" | "vsext.vf2" => Some(2),
        "vzext.vf4" | "vsext.vf4" => Some(4),
        "vzext.vf8" | "vsext.vf8" => Some(8),
        _ => None,
    }
}

/// Fixed uop count for whole-register mnemonics.
///
/// `vmv<N>r.v` copies N registers; segmented unit-stride loads produce one
/// uop per field (NF).
pub fn whole_reg_uop_count(mnemonic: &str) -> Option<u32> {
    if let Some(rest) = mnemonic.strip_prefix("vmv") {
        if let Some(n) = rest.strip_suffix("r.v") {
            return n.parse().ok();
        }
    }
    if let Some(rest) = mnemonic.strip_prefix("vlseg") {
        // "vlseg<NF>e<eew>.v"
        let nf: String = rest.chars().take_while(char::is_ascii_digit).collect();
        return nf.parse().ok();
    }
    None
}

/// Effective element width in bits encoded in a vector memory mnemonic.
pub fn mem_eew(mnemonic: &str) -> Option<u32> {
    let digits: String = mnemonic
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
