use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::crm::ScheduleId;

/// A fully collected booking intent, ready for the CRM or for the fallback
/// queue when the CRM is unavailable. Carries everything an administrator
/// needs to reconcile the request by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub group: String,
    pub starts_at: DateTime<Utc>,
    pub client_name: String,
    pub client_phone: String,
    pub schedule_id: Option<ScheduleId>,
    pub correlation_id: String,
}

impl BookingRequest {
    /// Fingerprint input identity: contact plus target slot. Two requests
    /// with the same phone and schedule are the same logical booking.
    pub fn fingerprint_material(&self) -> Option<(&str, &str)> {
        self.schedule_id.as_ref().map(|schedule| (self.client_phone.as_str(), schedule.0.as_str()))
    }
}
