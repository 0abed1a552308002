//! Bounded webhook delivery history (spec §7 / §9): a ring of the last 100
//! delivery outcomes, independent of in-flight alert processing — a failed
//! delivery never blocks or retries alert evaluation, it's just recorded here.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub webhook_name: String,
    pub url: String,
    pub service: String,
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_attempts: u32,
    pub payload_size: usize,
}

pub struct DeliveryHistory {
    ring: Mutex<VecDeque<DeliveryOutcome>>,
}

impl Default for DeliveryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryHistory {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn record(&self, outcome: DeliveryOutcome) {
        let mut ring = self.ring.lock();
        if ring.len() == HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(outcome);
    }

    pub fn recent(&self) -> Vec<DeliveryOutcome> {
        self.ring.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str) -> DeliveryOutcome {
        DeliveryOutcome {
            webhook_name: "wh1".into(),
            url: "https://hook".into(),
            service: "generic".into(),
            alert_id: id.into(),
            timestamp: Utc::now(),
            status_code: Some(200),
            success: true,
            error_message: None,
            retry_attempts: 0,
            payload_size: 128,
        }
    }

    #[test]
    fn ring_caps_at_100_dropping_oldest() {
        let history = DeliveryHistory::new();
        for i in 0..120 {
            history.record(outcome(&i.to_string()));
        }
        let recent = history.recent();
        assert_eq!(recent.len(), HISTORY_CAPACITY);
        assert_eq!(recent.first().unwrap().alert_id, "20");
        assert_eq!(recent.last().unwrap().alert_id, "119");
    }

    #[test]
    fn records_failure_details() {
        let history = DeliveryHistory::new();
        let mut failed = outcome("cpu-vm100");
        failed.success = false;
        failed.error_message = Some("blocked host".to_string());
        history.record(failed);
        assert_eq!(history.recent()[0].error_message.as_deref(), Some("blocked host"));
    }
}
