use atc_protocol::{AircraftPayload, BusMessage, ClientFilters};

/// Evaluate whether `msg` should be delivered to a client with `filters`
/// (`spec.md` §4.7). Pure function of its inputs — applying it twice with
/// the same arguments always yields the same decision.
pub fn passes(msg: &BusMessage, filters: &ClientFilters) -> bool {
    let aircraft = match msg {
        BusMessage::AircraftAdded(a) | BusMessage::AircraftUpdate(a) | BusMessage::AircraftRemoved(a) => a,
        _ => return true,
    };
    aircraft_passes(aircraft, filters)
}

fn aircraft_passes(aircraft: &AircraftPayload, filters: &ClientFilters) -> bool {
    if filters
        .selected_aircraft_hex
        .as_deref()
        .is_some_and(|hex| hex == aircraft.hex)
    {
        return true;
    }
    if !filters.show_air && !filters.show_ground {
        return false;
    }
    if aircraft.on_ground && !filters.show_ground {
        return false;
    }
    if !aircraft.on_ground && !filters.show_air {
        return false;
    }
    if !filters.phases.is_empty() {
        if filters.phases.values().all(|enabled| !enabled) {
            return false;
        }
        if let Some(phase) = &aircraft.phase {
            if filters.phases.get(phase).is_some_and(|enabled| !enabled) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aircraft(hex: &str, on_ground: bool, phase: Option<&str>) -> AircraftPayload {
        AircraftPayload {
            hex: hex.to_owned(),
            on_ground,
            phase: phase.map(str::to_owned),
            extra: json!({}),
        }
    }

    #[test]
    fn drops_ground_aircraft_when_only_air_shown() {
        let filters = ClientFilters {
            show_air: true,
            show_ground: false,
            phases: Default::default(),
            selected_aircraft_hex: None,
        };
        let msg = BusMessage::AircraftUpdate(aircraft("abc123", true, Some("TAX")));
        assert!(!passes(&msg, &filters));
    }

    #[test]
    fn always_delivers_the_selected_aircraft_regardless_of_ground_state() {
        let filters = ClientFilters {
            show_air: true,
            show_ground: false,
            phases: Default::default(),
            selected_aircraft_hex: Some("abc123".to_owned()),
        };
        let msg = BusMessage::AircraftUpdate(aircraft("abc123", true, None));
        assert!(passes(&msg, &filters));
    }

    #[test]
    fn phase_map_drops_disabled_phases() {
        let mut phases = std::collections::HashMap::new();
        phases.insert("CRZ".to_owned(), true);
        phases.insert("TAX".to_owned(), false);
        let filters = ClientFilters {
            show_air: true,
            show_ground: true,
            phases,
            selected_aircraft_hex: None,
        };
        assert!(!passes(
            &BusMessage::AircraftUpdate(aircraft("x", true, Some("TAX"))),
            &filters
        ));
        assert!(passes(
            &BusMessage::AircraftUpdate(aircraft("x", false, Some("CRZ"))),
            &filters
        ));
    }

    #[test]
    fn non_aircraft_messages_bypass_the_filter() {
        let filters = ClientFilters::default();
        let msg = BusMessage::Transcription(atc_protocol::TranscriptionPayload {
            id: uuid::Uuid::nil(),
            frequency_id: uuid::Uuid::nil(),
            text: "roger".to_owned(),
            timestamp: "2026-08-01T00:00:00Z".to_owned(),
            is_complete: true,
            is_processed: false,
            content_processed: None,
        });
        assert!(passes(&msg, &filters));
    }

    #[test]
    fn filter_decision_is_idempotent() {
        let filters = ClientFilters {
            show_air: true,
            show_ground: false,
            phases: Default::default(),
            selected_aircraft_hex: None,
        };
        let msg = BusMessage::AircraftUpdate(aircraft("abc123", true, None));
        assert_eq!(passes(&msg, &filters), passes(&msg, &filters));
    }
}
