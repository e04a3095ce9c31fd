//! Event matcher: the accumulated event log and the trigger evaluation
//! against it.
//!
//! Every successful match records a consumption marker keyed by
//! `(campaign id, trigger-set hash)`. The hash covers the identity and the
//! occurrence sequence of each event that satisfied a trigger, so the same
//! campaign cannot fire twice off the same recorded occurrences, while a
//! fresh occurrence of the event produces a new hash.

use std::collections::{HashMap, HashSet};

use campaign_core::{Attributes, Campaign, CampaignId, Event, EventKey};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("campaign has no triggers")]
    NoTriggers,

    #[error("trigger on {0} is not satisfied by the recorded events")]
    TriggersNotSatisfied(EventKey),

    #[error("the provided set of events has already been used for this campaign")]
    ProvidedSetOfEventsHaveAlreadyBeenUsed,
}

/// Hex SHA-256 over the events that satisfied a campaign's triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerSetHash(String);

impl TriggerSetHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct RecordedEvent {
    attributes: Option<Attributes>,
    timestamp: i64,
    sequence: u64,
}

#[derive(Debug, Default)]
struct MatchedEventsRecord {
    events: HashMap<EventKey, RecordedEvent>,
    consumed: HashSet<(CampaignId, TriggerSetHash)>,
    next_sequence: u64,
}

/// Thread-safe event log. All mutation goes through `match_and_store`,
/// `matched_events` and `reset`.
#[derive(Debug, Default)]
pub struct EventMatcher {
    record: Mutex<MatchedEventsRecord>,
}

impl EventMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event, replacing the attributes stored for its identity.
    /// Invalid events are ignored.
    pub fn match_and_store(&self, event: &Event) {
        if event.is_invalid() {
            debug!(name = %event.name, "Ignoring invalid event");
            return;
        }
        let mut record = self.record.lock();
        record.next_sequence += 1;
        let recorded = RecordedEvent {
            attributes: event.attribute_map().cloned(),
            timestamp: event.timestamp,
            sequence: record.next_sequence,
        };
        debug!(event = %event.key(), sequence = recorded.sequence, "Recorded event");
        record.events.insert(event.key(), recorded);
    }

    /// Checks every trigger of `campaign` against the log (AND across
    /// triggers, AND across each trigger's conditions) and consumes the
    /// satisfying event set on success.
    pub fn matched_events(&self, campaign: &Campaign) -> Result<(), MatcherError> {
        if campaign.triggers.is_empty() {
            return Err(MatcherError::NoTriggers);
        }

        let mut record = self.record.lock();
        let mut hasher = Sha256::new();
        for trigger in &campaign.triggers {
            let key = trigger.event_key();
            let recorded = record
                .events
                .get(&key)
                .filter(|r| trigger.conditions_hold(r.attributes.as_ref()))
                .ok_or_else(|| MatcherError::TriggersNotSatisfied(key.clone()))?;
            hasher.update(key.to_string().as_bytes());
            hasher.update(recorded.sequence.to_be_bytes());
        }
        let hash = TriggerSetHash(hex::encode(hasher.finalize()));

        if !record.consumed.insert((campaign.id.clone(), hash)) {
            return Err(MatcherError::ProvidedSetOfEventsHaveAlreadyBeenUsed);
        }
        Ok(())
    }

    /// Drops the whole log and every consumption marker.
    pub fn reset(&self) {
        let mut record = self.record.lock();
        record.events.clear();
        record.consumed.clear();
    }

    /// Latest attributes and timestamp stored for an identity. The outer
    /// `Option` is whether the event was seen at all.
    pub fn recorded_event(&self, key: &EventKey) -> Option<(Option<Attributes>, i64)> {
        self.record
            .lock()
            .events
            .get(key)
            .map(|r| (r.attributes.clone(), r.timestamp))
    }

    pub fn recorded_count(&self) -> usize {
        self.record.lock().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::{AttributeCondition, AttributeValue, ConditionOperator, EventType, Trigger};

    fn purchase_over(amount: f64) -> Trigger {
        Trigger::new(EventType::PurchaseSuccessful, "Order").with_condition(AttributeCondition::new(
            "total",
            ConditionOperator::GreaterThan,
            AttributeValue::Double(amount),
        ))
    }

    fn order(total: f64) -> Event {
        Event::new(EventType::PurchaseSuccessful, "order")
            .with_attribute("total", AttributeValue::Double(total))
    }

    #[test]
    fn test_single_trigger_matches() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("big-spender", vec![purchase_over(100.0)]);

        assert!(matches!(
            matcher.matched_events(&campaign),
            Err(MatcherError::TriggersNotSatisfied(_))
        ));

        matcher.match_and_store(&order(150.0));
        assert_eq!(matcher.matched_events(&campaign), Ok(()));
    }

    #[test]
    fn test_near_misses_do_not_match() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("big-spender", vec![purchase_over(100.0)]);

        // Wrong name.
        matcher.match_and_store(
            &Event::new(EventType::PurchaseSuccessful, "refund")
                .with_attribute("total", AttributeValue::Double(500.0)),
        );
        // Right identity, failing condition.
        matcher.match_and_store(&order(50.0));
        // Right name, wrong type.
        matcher.match_and_store(
            &Event::new(EventType::Custom, "order")
                .with_attribute("total", AttributeValue::Double(500.0)),
        );

        assert!(matcher.matched_events(&campaign).is_err());
    }

    #[test]
    fn test_latest_attributes_win() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("big-spender", vec![purchase_over(100.0)]);

        matcher.match_and_store(&order(150.0));
        matcher.match_and_store(&order(20.0));
        assert!(matcher.matched_events(&campaign).is_err());
    }

    #[test]
    fn test_all_triggers_required() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular(
            "onboarding",
            vec![
                Trigger::new(EventType::AppStart, ""),
                Trigger::new(EventType::LoginSuccessful, "email"),
            ],
        );

        matcher.match_and_store(&Event::new(EventType::AppStart, ""));
        assert!(matcher.matched_events(&campaign).is_err());

        matcher.match_and_store(&Event::new(EventType::LoginSuccessful, "Email"));
        assert_eq!(matcher.matched_events(&campaign), Ok(()));
    }

    #[test]
    fn test_same_event_set_is_consumed_once() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("welcome", vec![Trigger::new(EventType::AppStart, "")]);
        matcher.match_and_store(&Event::new(EventType::AppStart, ""));

        assert_eq!(matcher.matched_events(&campaign), Ok(()));
        assert_eq!(
            matcher.matched_events(&campaign),
            Err(MatcherError::ProvidedSetOfEventsHaveAlreadyBeenUsed)
        );

        // A different campaign may still use the same events.
        let other = Campaign::regular("welcome-2", vec![Trigger::new(EventType::AppStart, "")]);
        assert_eq!(matcher.matched_events(&other), Ok(()));

        // A fresh occurrence is a new event set.
        matcher.match_and_store(&Event::new(EventType::AppStart, ""));
        assert_eq!(matcher.matched_events(&campaign), Ok(()));
    }

    #[test]
    fn test_unrelated_events_do_not_affect_matching() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("welcome", vec![Trigger::new(EventType::AppStart, "")]);
        matcher.match_and_store(&Event::new(EventType::AppStart, ""));
        assert_eq!(matcher.matched_events(&campaign), Ok(()));

        matcher.match_and_store(&Event::new(EventType::Custom, "scrolled"));
        assert_eq!(
            matcher.matched_events(&campaign),
            Err(MatcherError::ProvidedSetOfEventsHaveAlreadyBeenUsed)
        );
    }

    #[test]
    fn test_invalid_events_are_ignored() {
        let matcher = EventMatcher::new();
        matcher.match_and_store(&Event::invalid("garbage"));
        assert_eq!(matcher.recorded_count(), 0);

        let never = vec![Trigger::new(EventType::Invalid, "garbage")];
        let campaign = Campaign::regular("never", never);
        assert!(matcher.matched_events(&campaign).is_err());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let matcher = EventMatcher::new();
        matcher.match_and_store(&order(150.0));
        let a = Campaign::regular("a", vec![purchase_over(100.0)]);
        let b = Campaign::regular("b", vec![purchase_over(100.0)]);
        assert_eq!(matcher.matched_events(&a), matcher.matched_events(&b));
    }

    #[test]
    fn test_reset_clears_log_and_markers() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("welcome", vec![Trigger::new(EventType::AppStart, "")]);
        matcher.match_and_store(&Event::new(EventType::AppStart, ""));
        assert_eq!(matcher.matched_events(&campaign), Ok(()));

        matcher.reset();
        assert_eq!(matcher.recorded_count(), 0);
        assert!(matcher.matched_events(&campaign).is_err());
    }

    #[test]
    fn test_no_triggers() {
        let matcher = EventMatcher::new();
        let campaign = Campaign::regular("empty", vec![]);
        assert_eq!(matcher.matched_events(&campaign), Err(MatcherError::NoTriggers));
    }
}
