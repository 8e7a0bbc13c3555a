//! Data-side behavior: store/load round trips for every access width, the
//! doubleword half-swap identity, sign extension, the uncached path, dirty
//! writebacks, and TLB-mapped accesses.

mod common;

use common::*;

const DATA: u64 = 0xffff_ffff_8000_2000;

/// Context with a primed, zeroed data line at `DATA` and r1 pointing at it.
fn data_ctx(program: &[u32]) -> TestContext {
    let mut ctx = TestContext::with_program(program);
    ctx.cpu.prime_dcache(DATA, &[0; 8]);
    ctx.cpu.set_gpr(1, DATA);
    ctx
}

#[test]
fn byte_store_load_round_trip() {
    let program = [
        sb(2, 1, 0),
        sb(3, 1, 1),
        lbu(10, 1, 0),
        lb(11, 1, 1),
        lbu(12, 1, 1),
        nop(),
        nop(),
    ];
    let mut ctx = data_ctx(&program);
    ctx.cpu.set_gpr(2, 0x41);
    ctx.cpu.set_gpr(3, 0x80);

    ctx.run(16);
    assert_eq!(ctx.cpu.gpr(10), 0x41);
    // lb sign-extends, lbu does not.
    assert_eq!(ctx.cpu.gpr(11), 0xffff_ffff_ffff_ff80);
    assert_eq!(ctx.cpu.gpr(12), 0x80);
}

#[test]
fn halfword_store_load_round_trip() {
    let program = [
        sh(2, 1, 0),
        sh(3, 1, 2),
        lhu(10, 1, 0),
        lh(11, 1, 2),
        lhu(12, 1, 2),
        nop(),
        nop(),
    ];
    let mut ctx = data_ctx(&program);
    ctx.cpu.set_gpr(2, 0x1234);
    ctx.cpu.set_gpr(3, 0x8001);

    ctx.run(16);
    assert_eq!(ctx.cpu.gpr(10), 0x1234);
    assert_eq!(ctx.cpu.gpr(11), 0xffff_ffff_ffff_8001);
    assert_eq!(ctx.cpu.gpr(12), 0x8001);
}

#[test]
fn word_store_load_round_trip() {
    let program = [
        sw(2, 1, 0),
        lw(10, 1, 0),
        lwu(11, 1, 0),
        nop(),
        nop(),
    ];
    let mut ctx = data_ctx(&program);
    ctx.cpu.set_gpr(2, 0x8000_0001);

    ctx.run(14);
    assert_eq!(ctx.cpu.gpr(10), 0xffff_ffff_8000_0001);
    assert_eq!(ctx.cpu.gpr(11), 0x8000_0001);
}

#[test]
fn doubleword_half_swap_composes_to_identity() {
    // The store path swaps the 32-bit halves into the line's bus word
    // order; the load path composes high-word-first. Together they are the
    // identity on every 8-byte value.
    let program = [
        sd(2, 1, 0),
        sd(3, 1, 8),
        ld(10, 1, 0),
        ld(11, 1, 8),
        nop(),
        nop(),
    ];
    let mut ctx = data_ctx(&program);
    ctx.cpu.set_gpr(2, 0x8899_aabb_ccdd_eeff);
    ctx.cpu.set_gpr(3, 0x0102_0304_0506_0708);

    ctx.run(16);
    assert_eq!(ctx.cpu.gpr(10), 0x8899_aabb_ccdd_eeff);
    assert_eq!(ctx.cpu.gpr(11), 0x0102_0304_0506_0708);
}

#[test]
fn stores_merge_into_the_line_without_clobbering_neighbors() {
    let program = [
        sb(2, 1, 1),
        lw(10, 1, 0),
        nop(),
        nop(),
    ];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.prime_dcache(DATA, &[0x1122_3344, 0, 0, 0]);
    ctx.cpu.set_gpr(1, DATA);
    ctx.cpu.set_gpr(2, 0xab);

    ctx.run(12);
    // Byte 1 is the second-most-significant lane of the word.
    assert_eq!(ctx.cpu.gpr(10), 0x11ab_3344);
}

#[test]
fn uncached_store_load_round_trip() {
    // kseg1 alias of the same RAM: every access goes out on the bus and
    // charges the uncached penalty instead of touching the dcache.
    let program = [
        sw(2, 1, 0),
        lw(10, 1, 0),
        nop(),
        nop(),
    ];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.set_gpr(1, 0xffff_ffff_a000_2000);
    ctx.cpu.set_gpr(2, 0xcafe_babe);

    ctx.run(200);
    assert_eq!(ctx.cpu.gpr(10), 0xffff_ffff_cafe_babe);
    assert_eq!(ctx.bus.word(0x2000), 0xcafe_babe);
    assert!(ctx.bus.writes > 0);
}

#[test]
fn replacing_a_dirty_line_writes_the_victim_back() {
    // 0x8000_2000 and 0x8000_4000 share a dcache index with different
    // tags, so the second access evicts the first.
    let other = 0xffff_ffff_8000_4000u64;
    let program = [
        sw(2, 1, 0),  // dirty the primed line
        lw(3, 4, 0),  // conflict miss: victim written back, line replaced
        lw(5, 1, 0),  // miss again: refill returns the written-back value
        nop(),
        nop(),
    ];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.prime_dcache(DATA, &[0; 4]);
    ctx.cpu.set_gpr(1, DATA);
    ctx.cpu.set_gpr(4, other);
    ctx.cpu.set_gpr(2, 0xdead_beef);
    ctx.bus.set_word(0x4000, 0x1234_5678);

    ctx.run(200);
    assert_eq!(ctx.bus.word(0x2000), 0xdead_beef);
    assert_eq!(ctx.cpu.gpr(3), 0x1234_5678);
    assert_eq!(ctx.cpu.gpr(5), 0xffff_ffff_dead_beef);
}

#[test]
fn dcache_miss_fills_from_the_bus() {
    let program = [lw(3, 1, 0), nop(), nop(), nop()];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.set_gpr(1, DATA);
    ctx.bus.set_word(0x2000, 0x0bad_f00d);

    ctx.run(40);
    assert_eq!(ctx.cpu.gpr(3), 0x0bad_f00d);
    // A 4-word block fetch, not a single word.
    assert!(ctx.bus.reads >= 4);
}

#[test]
fn mapped_segment_translates_through_the_tlb() {
    let va = 0x0000_0000_0040_0000u64;
    let program = [lw(3, 1, 0), nop(), nop(), nop()];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.set_gpr(1, va);

    // Map the useg page pair at `va` onto PA 0x3000/0x4000.
    ctx.cpu.tlb_mut().write(0, va, 0, 0, true);
    ctx.cpu.cp0_mut().pfn[0] = [0x3000, 0x4000];
    ctx.bus.set_word(0x3000, 0x5555_0001);

    ctx.run(40);
    assert_eq!(ctx.cpu.gpr(3), 0x5555_0001);
}

#[test]
fn odd_page_of_a_tlb_pair_selects_the_second_pfn() {
    let va = 0x0000_0000_0040_1000u64; // odd 4K page of the pair
    let program = [lw(3, 1, 0), nop(), nop(), nop()];
    let mut ctx = TestContext::with_program(&program);
    ctx.cpu.set_gpr(1, va);

    ctx.cpu.tlb_mut().write(0, va, 0, 0, true);
    ctx.cpu.cp0_mut().pfn[0] = [0x3000, 0x4000];
    ctx.bus.set_word(0x4000, 0x5555_0002);

    ctx.run(40);
    assert_eq!(ctx.cpu.gpr(3), 0x5555_0002);
}
