//! Hard rules applied to every model response, independent of prompt
//! wording. The model's text is never trusted as control flow; anything
//! that trips a rule is replaced by a safe canned reply.

use tracing::warn;

use crate::knowledge::KnowledgeBase;

/// What the model produced for one turn, as seen by the policy layer.
#[derive(Clone, Debug, Default)]
pub struct TurnFacts<'a> {
    pub reply_text: &'a str,
    /// True when a booking tool call was actually issued this turn.
    pub booking_call_issued: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyViolation {
    /// The reply quotes a price figure that is not in the knowledge base.
    FabricatedPrice { quoted: u64 },
    /// The reply claims a booking happened without a tool call behind it.
    BookingClaimWithoutCall,
}

impl PolicyViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FabricatedPrice { .. } => "fabricated_price",
            Self::BookingClaimWithoutCall => "booking_claim_without_call",
        }
    }
}

/// The rule table. Rules are data plus a check function; evaluation order
/// does not matter and every rule always runs.
pub struct PolicyEnforcer {
    rules: Vec<Rule>,
}

struct Rule {
    name: &'static str,
    check: fn(&TurnFacts<'_>, &KnowledgeBase) -> Option<PolicyViolation>,
}

impl PolicyEnforcer {
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Rule { name: "price_must_match_knowledge", check: check_price },
                Rule { name: "booking_requires_tool_call", check: check_booking_claim },
            ],
        }
    }

    pub fn check(&self, facts: &TurnFacts<'_>, knowledge: &KnowledgeBase) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            if let Some(violation) = (rule.check)(facts, knowledge) {
                warn!(
                    event_name = "policy_violation",
                    rule = rule.name,
                    violation = violation.as_str(),
                    "model reply tripped a hard rule"
                );
                violations.push(violation);
            }
        }
        violations
    }
}

fn check_price(facts: &TurnFacts<'_>, knowledge: &KnowledgeBase) -> Option<PolicyViolation> {
    let text = facts.reply_text.to_lowercase();
    if !(text.contains("price") || text.contains("cost") || text.contains('₽')) {
        return None;
    }

    for quoted in extract_amounts(facts.reply_text) {
        let known = knowledge
            .all_prices()
            .values()
            .any(|price| *price == quoted || *price == quoted * 100);
        if !known {
            return Some(PolicyViolation::FabricatedPrice { quoted });
        }
    }
    None
}

fn check_booking_claim(facts: &TurnFacts<'_>, _: &KnowledgeBase) -> Option<PolicyViolation> {
    if facts.booking_call_issued {
        return None;
    }
    let text = facts.reply_text.to_lowercase();
    let claims = ["you're booked", "you are booked", "booking confirmed", "i've booked"];
    if claims.iter().any(|claim| text.contains(claim)) {
        return Some(PolicyViolation::BookingClaimWithoutCall);
    }
    None
}

/// Plain integers in the text; the price rule only cares about figures,
/// not currency formatting.
fn extract_amounts(text: &str) -> Vec<u64> {
    let mut amounts = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            if let Ok(value) = current.parse::<u64>() {
                // Skip figures that read as times or dates.
                if value >= 100 {
                    amounts.push(value);
                }
            }
            current.clear();
        }
    }
    if let Ok(value) = current.parse::<u64>() {
        if value >= 100 {
            amounts.push(value);
        }
    }
    amounts
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::knowledge::{KnowledgeBase, Topic};

    use super::{PolicyEnforcer, PolicyViolation, TurnFacts};

    fn knowledge() -> KnowledgeBase {
        let mut prices = BTreeMap::new();
        prices.insert("salsa".to_string(), 500);
        KnowledgeBase::from_parts(
            vec![Topic { key: "noop".into(), keywords: vec![], answer: String::new() }],
            prices,
        )
    }

    #[test]
    fn known_price_passes_fabricated_price_fails() {
        let enforcer = PolicyEnforcer::standard();
        let knowledge = knowledge();

        let ok = TurnFacts { reply_text: "The price is 500 per class.", booking_call_issued: false };
        assert!(enforcer.check(&ok, &knowledge).is_empty());

        let bad = TurnFacts { reply_text: "The price is 999 per class.", booking_call_issued: false };
        assert_eq!(
            enforcer.check(&bad, &knowledge),
            vec![PolicyViolation::FabricatedPrice { quoted: 999 }]
        );
    }

    #[test]
    fn booking_claim_needs_a_real_call() {
        let enforcer = PolicyEnforcer::standard();
        let knowledge = knowledge();

        let fake =
            TurnFacts { reply_text: "You're booked for tomorrow!", booking_call_issued: false };
        assert_eq!(
            enforcer.check(&fake, &knowledge),
            vec![PolicyViolation::BookingClaimWithoutCall]
        );

        let real =
            TurnFacts { reply_text: "You're booked for tomorrow!", booking_call_issued: true };
        assert!(enforcer.check(&real, &knowledge).is_empty());
    }

    #[test]
    fn non_price_numbers_are_ignored() {
        let enforcer = PolicyEnforcer::standard();
        let knowledge = knowledge();
        let facts = TurnFacts {
            reply_text: "See you tomorrow at 19:00, studio 2!",
            booking_call_issued: false,
        };
        assert!(enforcer.check(&facts, &knowledge).is_empty());
    }
}
