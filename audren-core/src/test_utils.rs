//! Helpers shared by unit tests

use std::sync::{Arc, Once};

use crate::memory::{GuestMemory, SharedMemory};

/// Route `tracing` output to the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A zeroed guest arena
pub fn guest_memory(base: u64, size: usize) -> Arc<SharedMemory> {
    init_tracing();
    Arc::new(SharedMemory::new(base, size))
}

/// Store PCM16 samples little-endian at `address`
pub fn write_pcm(memory: &SharedMemory, address: u64, samples: &[i16]) {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    memory.write_block(address, &bytes).unwrap();
}
