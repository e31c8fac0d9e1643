use crate::core::message::now_millis;

/// Returns a fresh `conv_<hex>` identifier.
pub fn generate_conversation_id() -> String {
    let mut bytes = [0u8; 16];
    match getrandom::fill(&mut bytes) {
        Ok(()) => {
            let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("conv_{hex}")
        }
        // No entropy source: fall back to the clock, like ids minted by the backend.
        Err(_) => format!("conv_{}", now_millis()),
    }
}
