//! The joint TLB, probed by the RF and DC stages for mapped segments.
//!
//! Each entry covers an even/odd page pair. The matching state (VPN2, ASID,
//! global bit, page size) lives here; the translation outputs (page_mask and
//! the pre-shifted pfn pair) live on CP0, indexed by the probe result.

#[derive(Clone, Copy)]
struct TlbEntry {
    /// Virtual base of the pair, already masked down to the pair granule.
    vpn2: u64,
    /// Span mask of the pair: page_mask | 0x1fff for the 4K case.
    span: u64,
    asid: u8,
    global: bool,
    valid: bool,
}

impl TlbEntry {
    const INVALID: TlbEntry = TlbEntry {
        vpn2: 0,
        span: 0x1fff,
        asid: 0,
        global: false,
        valid: false,
    };
}

pub const NUM_TLB_ENTRIES: usize = 32;

pub struct Tlb {
    entries: [TlbEntry; NUM_TLB_ENTRIES],
}

impl Tlb {
    pub fn new() -> Tlb {
        Tlb { entries: [TlbEntry::INVALID; NUM_TLB_ENTRIES] }
    }

    /// Finds the entry covering `va` under `asid`. Matching is by VPN2 with
    /// the entry's own page granularity; a global entry ignores the ASID.
    pub fn probe(&self, va: u64, asid: u8) -> Option<usize> {
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.valid {
                continue;
            }
            if (va & !entry.span) == entry.vpn2 && (entry.global || entry.asid == asid) {
                return Some(index);
            }
        }
        None
    }

    /// Installs an entry. `page_mask` uses the EntryHi convention (0 for 4K
    /// pages); the caller is responsible for also setting the matching
    /// `cp0.page_mask[index]` and `cp0.pfn[index]` outputs.
    pub fn write(&mut self, index: usize, va: u64, page_mask: u32, asid: u8, global: bool) {
        let span = (page_mask as u64) | 0x1fff;
        self.entries[index] = TlbEntry {
            vpn2: va & !span,
            span,
            asid,
            global,
            valid: true,
        };
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Tlb::new()
    }
}
