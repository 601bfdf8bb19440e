//! Normalized webhook payload shapes (design notes: "Implementations should use tagged variants per event/request shape with compile-time exhaustiveness on dispatch" — the re-architecture called for in place of the source's dynamically typed request objects).

use serde::{Deserialize, Serialize};

/// Which external provider delivered the webhook; also the `provider`
/// column of `webhook_receipts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Carrier,
    Calendar,
    Billing,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Carrier => "carrier",
            Provider::Calendar => "calendar",
            Provider::Billing => "billing",
        }
    }
}

/// Voice call terminal status as reported by the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceStatus {
    NoAnswer,
    Busy,
    Failed,
    /// Any other carrier status (e.g. `completed`, `ringing`); these are
    /// ignored per.
    #[serde(other)]
    Other,
}

impl VoiceStatus {
    /// `true` for the three statuses that map to `CallDetected`.
    pub fn is_missed_call(self) -> bool {
        matches!(self, VoiceStatus::NoAnswer | VoiceStatus::Busy | VoiceStatus::Failed)
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            VoiceStatus::NoAnswer => Some("no-answer"),
            VoiceStatus::Busy => Some("busy"),
            VoiceStatus::Failed => Some("failed"),
            VoiceStatus::Other => None,
        }
    }
}

/// Normalized voice-status callback payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStatusWebhook {
    pub provider_event_id: String,
    pub from: String,
    pub to: String,
    pub status: VoiceStatus,
}

/// Normalized inbound-SMS payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundSmsWebhook {
    pub provider_event_id: String,
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Normalized SMS delivery-status callback payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsDeliveryStatusWebhook {
    pub provider_event_id: String,
    pub provider_ref: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
    #[serde(other)]
    Other,
}

/// Normalized external-calendar-change payload (push notification).
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarChangeWebhook {
    pub provider_event_id: String,
    pub calendar_ref: String,
}

/// Normalized billing/subscription-change payload. Consumed outside
/// this crate's core (Non-goals, "billing subscription mirror"); C1 still verifies, dedupes, resolves tenant, and emits —
/// the same four steps as every other provider kind.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionChangeWebhook {
    pub provider_event_id: String,
    pub customer_ref: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_three_voice_statuses_are_missed_calls() {
        assert!(VoiceStatus::NoAnswer.is_missed_call());
        assert!(VoiceStatus::Busy.is_missed_call());
        assert!(VoiceStatus::Failed.is_missed_call());
        assert!(!VoiceStatus::Other.is_missed_call());
    }
}
