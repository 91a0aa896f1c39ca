//! Wire and domain types for the decision core.
//!
//! Everything crossing the message bus is UTF-8 JSON; the closed enums here
//! pin the wire values (snake_case intents, SCREAMING_SNAKE actions/reasons)
//! so a decision serialized and read back is bit-equal.

use serde::{Deserialize, Serialize};

use crate::state_machine::SalePhase;

/// Classified comment intent. Closed set; anything the classifier emits
/// outside of it deserializes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    PriceQuestion,
    ProductQuestion,
    PurchaseIntent,
    Thanks,
    Complaint,
    Request,
    Chitchat,
    Spam,
    #[serde(other)]
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::PriceQuestion => "price_question",
            Intent::ProductQuestion => "product_question",
            Intent::PurchaseIntent => "purchase_intent",
            Intent::Thanks => "thanks",
            Intent::Complaint => "complaint",
            Intent::Request => "request",
            Intent::Chitchat => "chitchat",
            Intent::Spam => "spam",
            Intent::Unknown => "unknown",
        }
    }
}

/// What the host should do with a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Speak,
    Skip,
    Wait,
    Queue,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Speak => "SPEAK",
            Action::Skip => "SKIP",
            Action::Wait => "WAIT",
            Action::Queue => "QUEUE",
        }
    }
}

/// Why the brain decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    // Speak reasons
    Greeting,
    PriceQuestion,
    ProductQuestion,
    HighPriority,
    SaleCta,
    Engagement,

    // Skip reasons
    Spam,
    Duplicate,
    LowPriority,
    CooldownActive,

    // Wait reasons
    TooFast,
    QueueFull,
    StateTransition,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Greeting => "GREETING",
            Reason::PriceQuestion => "PRICE_QUESTION",
            Reason::ProductQuestion => "PRODUCT_QUESTION",
            Reason::HighPriority => "HIGH_PRIORITY",
            Reason::SaleCta => "SALE_CTA",
            Reason::Engagement => "ENGAGEMENT",
            Reason::Spam => "SPAM",
            Reason::Duplicate => "DUPLICATE",
            Reason::LowPriority => "LOW_PRIORITY",
            Reason::CooldownActive => "COOLDOWN_ACTIVE",
            Reason::TooFast => "TOO_FAST",
            Reason::QueueFull => "QUEUE_FULL",
            Reason::StateTransition => "STATE_TRANSITION",
        }
    }
}

/// Inbound message from the intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedComment {
    pub comment_id: Option<String>,
    pub user_id: Option<String>,
    pub username: String,
    pub nickname: Option<String>,
    pub original_comment: String,
    /// Preprocessed text, when the classifier provides one.
    pub content: Option<String>,
    pub intent: Intent,
    pub intent_confidence: Option<f64>,
    /// Classifier's own priority hint, 0..10. Advisory only.
    pub priority: Option<u8>,
    #[serde(default)]
    pub is_follower: bool,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub gift_value: f64,
    /// Seconds since epoch at ingestion.
    pub timestamp: f64,
}

impl ClassifiedComment {
    /// Text the downstream pipeline will respond to.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or(&self.original_comment)
    }

    /// Stable id, generating one if the crawler didn't supply it.
    pub fn id(&self) -> String {
        self.comment_id
            .clone()
            .unwrap_or_else(|| format!("cmt_{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Output of the brain for a single comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub reason: Reason,
    /// Computed priority. 1..=10 for scored decisions, 0 for gate rejections.
    pub priority: u8,
    /// Prescribed post-speak cooldown in seconds.
    pub cooldown: f64,
    /// Brain confidence in this decision, 0..1.
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Decision {
    pub fn gate(action: Action, reason: Reason) -> Self {
        Self {
            action,
            reason,
            priority: 0,
            cooldown: 0.0,
            confidence: 1.0,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Decision fields carried on the outbound speak request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainDecision {
    pub action: Action,
    pub reason: Reason,
    pub priority: u8,
    pub cooldown: f64,
    pub confidence: f64,
}

impl From<&Decision> for BrainDecision {
    fn from(decision: &Decision) -> Self {
        Self {
            action: decision.action,
            reason: decision.reason,
            priority: decision.priority,
            cooldown: decision.cooldown,
            confidence: decision.confidence,
        }
    }
}

/// Outbound message to the response generator: the original comment enriched
/// with the decision, the sale phase and the phase's response style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    #[serde(flatten)]
    pub comment: ClassifiedComment,
    pub brain_decision: BrainDecision,
    pub sale_state: SalePhase,
    pub response_style: String,
    pub orchestrator_timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_intent_string_maps_to_unknown() {
        let parsed: Intent = serde_json::from_str("\"emoji_wall\"").unwrap();
        assert_eq!(parsed, Intent::Unknown);

        let parsed: Intent = serde_json::from_str("\"price_question\"").unwrap();
        assert_eq!(parsed, Intent::PriceQuestion);
    }

    #[test]
    fn decision_round_trips_bit_equal() {
        let decision = Decision {
            action: Action::Speak,
            reason: Reason::SaleCta,
            priority: 10,
            cooldown: 2.5,
            confidence: 0.98,
            metadata: serde_json::Map::new(),
        };

        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("\"SPEAK\""));
        assert!(json.contains("\"SALE_CTA\""));

        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decision);
    }

    #[test]
    fn classified_comment_defaults_author_flags() {
        let raw = r#"{
            "username": "an_nguyen",
            "original_comment": "Giá bao nhiêu vậy shop?",
            "intent": "price_question",
            "timestamp": 1704067200.0
        }"#;

        let comment: ClassifiedComment = serde_json::from_str(raw).unwrap();
        assert!(!comment.is_follower);
        assert!(!comment.is_subscriber);
        assert_eq!(comment.gift_value, 0.0);
        assert_eq!(comment.text(), "Giá bao nhiêu vậy shop?");
        assert!(comment.id().starts_with("cmt_"));
    }
}
