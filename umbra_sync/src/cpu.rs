//! Processor identity and busy-wait relaxation.
//!
//! Early in boot the multiprocessor services that can tell processors apart
//! are not up yet; until a source is registered every caller is treated as
//! the boot processor. The reentrant lock consults this module when the
//! caller does not pass an identity explicitly.

use crate::once::Once;

/// Identity of the processor executing the current code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

/// Identity assumed while no source is registered.
pub const BOOT_CPU: CpuId = CpuId(0);

static CPU_ID_SOURCE: Once<fn() -> CpuId> = Once::new();

/// Registers the platform's "which processor am I" query. Only the first
/// registration takes effect.
pub fn register_cpu_id_source(source: fn() -> CpuId) {
    CPU_ID_SOURCE.call_once(|| source);
}

/// Identity of the calling processor, [`BOOT_CPU`] when no source has been
/// registered yet.
pub fn current() -> CpuId {
    match CPU_ID_SOURCE.get() {
        Some(source) => source(),
        None => BOOT_CPU,
    }
}

/// Hint to the processor that it is inside a busy-wait loop.
#[inline]
pub fn relax() {
    core::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_boot_cpu() {
        // Aucun test n'enregistre de source : l'identité par défaut s'applique.
        assert_eq!(current(), BOOT_CPU);
    }
}
