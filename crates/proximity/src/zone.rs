//! Signal-strength zone classification
//!
//! Classification is a pure function of the latest RSSI sample against
//! fixed, non-overlapping thresholds. Policy (who may transact, who may
//! relay) is a static table over the resulting zone.

use serde::{Deserialize, Serialize};

/// RSSI floor for the nearest zone, in dBm
const ALPHA_MIN_RSSI: i16 = -55;
const BETA_MIN_RSSI: i16 = -70;
const GAMMA_MIN_RSSI: i16 = -85;
const RELAY_MIN_RSSI: i16 = -100;

/// Discrete proximity/trust tier
///
/// Ordered nearest-first: `Alpha` is the strongest-signal, highest-trust
/// tier; `Offline` means the device is effectively absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Zone {
    Alpha,
    Beta,
    Gamma,
    Relay,
    Offline,
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Alpha => write!(f, "Alpha"),
            Zone::Beta => write!(f, "Beta"),
            Zone::Gamma => write!(f, "Gamma"),
            Zone::Relay => write!(f, "Relay"),
            Zone::Offline => write!(f, "Offline"),
        }
    }
}

/// Classify a signal-strength sample into a zone
///
/// Total and deterministic: every sample (including a missing one) maps to
/// exactly one zone. A missing sample classifies as the weakest zone.
pub fn classify(rssi: Option<i16>) -> Zone {
    match rssi {
        Some(value) if value >= ALPHA_MIN_RSSI => Zone::Alpha,
        Some(value) if value >= BETA_MIN_RSSI => Zone::Beta,
        Some(value) if value >= GAMMA_MIN_RSSI => Zone::Gamma,
        Some(value) if value >= RELAY_MIN_RSSI => Zone::Relay,
        _ => Zone::Offline,
    }
}

/// Whether a payment may be initiated toward a device in `zone`
///
/// Only the two nearest tiers are close enough to hand a transaction to.
pub fn can_transact(zone: Zone) -> bool {
    matches!(zone, Zone::Alpha | Zone::Beta)
}

/// Whether a device in `zone` may participate in packet relay
pub fn can_relay(zone: Zone) -> bool {
    zone != Zone::Offline
}
