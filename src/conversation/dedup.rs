//! Outbound idempotency key derivation.

use uuid::Uuid;

/// `blake3(tenant_id || conversation_id || outbound-sequence)`, used
/// when the caller doesn't supply a `client_dedup_key` of their own, so
/// a retried composer call within the same transaction attempt never
/// produces two outbound messages for one logical reply.
pub fn derive(tenant_id: Uuid, conversation_id: Uuid, outbound_sequence: i64) -> String {
    let mut input = Vec::with_capacity(32 + 8);
    input.extend_from_slice(tenant_id.as_bytes());
    input.extend_from_slice(conversation_id.as_bytes());
    input.extend_from_slice(&outbound_sequence.to_be_bytes());
    blake3::hash(&input).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_key() {
        let t = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_eq!(derive(t, c, 0), derive(t, c, 0));
    }

    #[test]
    fn different_sequence_produces_different_key() {
        let t = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(derive(t, c, 0), derive(t, c, 1));
    }
}
