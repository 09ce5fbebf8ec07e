//! Listener admission control (`spec.md` §4.3/§4.9, enforced by the
//! orchestrator over `StreamSession` state).
//!
//! Open Question decision #3 (`spec.md` §9, see `DESIGN.md`): the
//! duplicate-client check, the total-cap check, the per-frequency-cap
//! check, and the reservation of a slot all happen under one held
//! `std::sync::Mutex`, so two concurrent admissions can never both observe
//! `count == cap - 1` and both succeed.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use atc_protocol::FrequencyId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("client {0:?} is already connected to this frequency")]
    AlreadyConnected(String),
    #[error("total listener cap exceeded")]
    TotalCapExceeded,
    #[error("per-frequency listener cap exceeded")]
    FrequencyCapExceeded,
}

pub struct AdmissionControl {
    table: Mutex<HashMap<FrequencyId, HashSet<String>>>,
    max_total: u32,
    max_per_frequency: u32,
}

impl AdmissionControl {
    pub fn new(max_total: u32, max_per_frequency: u32) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            max_total,
            max_per_frequency,
        }
    }

    /// Reserve a listener slot for `client_id` on `frequency_id`. All three
    /// rejection reasons in `spec.md` §4.3 are checked, and the slot is
    /// reserved, in the same critical section.
    pub fn try_admit(&self, frequency_id: FrequencyId, client_id: &str) -> Result<(), AdmissionError> {
        let mut table = self.table.lock().expect("admission table poisoned");

        if table.get(&frequency_id).is_some_and(|s| s.contains(client_id)) {
            return Err(AdmissionError::AlreadyConnected(client_id.to_owned()));
        }
        let total: usize = table.values().map(HashSet::len).sum();
        if total >= self.max_total as usize {
            return Err(AdmissionError::TotalCapExceeded);
        }
        let per_frequency = table.get(&frequency_id).map(HashSet::len).unwrap_or(0);
        if per_frequency >= self.max_per_frequency as usize {
            return Err(AdmissionError::FrequencyCapExceeded);
        }

        table.entry(frequency_id).or_default().insert(client_id.to_owned());
        Ok(())
    }

    /// Release a previously admitted slot. Idempotent.
    pub fn release(&self, frequency_id: FrequencyId, client_id: &str) {
        let mut table = self.table.lock().expect("admission table poisoned");
        if let Some(set) = table.get_mut(&frequency_id) {
            set.remove(client_id);
            if set.is_empty() {
                table.remove(&frequency_id);
            }
        }
    }

    pub fn total_listeners(&self) -> usize {
        self.table.lock().expect("admission table poisoned").values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_client_on_same_frequency_is_rejected() {
        let admission = AdmissionControl::new(100, 10);
        let freq = uuid::Uuid::new_v4();
        admission.try_admit(freq, "c1").unwrap();
        assert_eq!(admission.try_admit(freq, "c1"), Err(AdmissionError::AlreadyConnected("c1".to_owned())));
    }

    #[test]
    fn eleventh_client_on_same_frequency_hits_the_per_frequency_cap() {
        let admission = AdmissionControl::new(100, 10);
        let freq = uuid::Uuid::new_v4();
        for i in 0..10 {
            admission.try_admit(freq, &format!("c{i}")).unwrap();
        }
        assert_eq!(admission.try_admit(freq, "c10"), Err(AdmissionError::FrequencyCapExceeded));
    }

    #[test]
    fn total_cap_is_enforced_across_frequencies() {
        let admission = AdmissionControl::new(2, 10);
        let freq_a = uuid::Uuid::new_v4();
        let freq_b = uuid::Uuid::new_v4();
        admission.try_admit(freq_a, "c1").unwrap();
        admission.try_admit(freq_b, "c2").unwrap();
        assert_eq!(admission.try_admit(freq_a, "c3"), Err(AdmissionError::TotalCapExceeded));
    }

    #[test]
    fn release_frees_a_slot_for_reuse() {
        let admission = AdmissionControl::new(1, 1);
        let freq = uuid::Uuid::new_v4();
        admission.try_admit(freq, "c1").unwrap();
        admission.release(freq, "c1");
        assert_eq!(admission.total_listeners(), 0);
        admission.try_admit(freq, "c2").unwrap();
    }
}
