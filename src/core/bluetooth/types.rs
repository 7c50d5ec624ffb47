//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;
use uuid::Uuid;

/// Where a link session currently is. Moves strictly forward within one
/// attempt; a failure ends the attempt instead of stepping back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    SubscribingRx,
    Active,
    Disconnecting,
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A peripheral picked by a scan. Bound to one physical device for one
/// connection attempt and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    /// Platform-specific unique identifier
    pub id: String,
    /// The advertised name, if any
    pub name: Option<String>,
    /// MAC address when the platform exposes one
    pub address: Option<String>,
    /// The signal strength (RSSI) at discovery time
    pub rssi: Option<i16>,
}

impl DeviceHandle {
    pub fn label(&self) -> String {
        match (&self.name, &self.address) {
            (Some(name), Some(addr)) => format!("{} [{}]", name, addr),
            (Some(name), None) => format!("{} ({})", name, self.id),
            (None, Some(addr)) => addr.clone(),
            (None, None) => self.id.clone(),
        }
    }
}

/// Attribute handle within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AttrHandle(pub u16);

impl AttrHandle {
    pub fn offset(self, by: u16) -> Option<AttrHandle> {
        self.0.checked_add(by).map(AttrHandle)
    }
}

impl std::fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Handle range of one discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceRange {
    pub uuid: Uuid,
    pub start: AttrHandle,
    pub end: AttrHandle,
}

impl ServiceRange {
    pub fn contains(&self, handle: AttrHandle) -> bool {
        self.start <= handle && handle <= self.end
    }
}

/// The two characteristics a session talks through. Resolved once per
/// session and never carried into the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CharacteristicRefs {
    /// Peripheral -> central
    pub notify_handle: AttrHandle,
    /// Central -> peripheral
    pub write_handle: AttrHandle,
}

/// How peer-initiated values are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    Notify,
    /// Acknowledged delivery
    #[default]
    Indicate,
}

/// What a scan is looking for.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Substring of the advertised name, compared case-insensitively
    pub name: Option<String>,
    /// Exact MAC address, compared case-insensitively
    pub address: Option<String>,
    /// Advertised service UUID
    pub service: Option<Uuid>,
    /// Results weaker than this are ignored
    pub min_rssi: Option<i16>,
}

/// One advertisement as seen by the scanner.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: Option<String>,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

impl ScanFilter {
    /// First match wins; there is no RSSI ordering between candidates.
    pub fn matches(&self, adv: &Advertisement) -> bool {
        if let (Some(min), Some(rssi)) = (self.min_rssi, adv.rssi) {
            if rssi < min {
                return false;
            }
        }
        let by_address = match (&self.address, &adv.address) {
            (Some(want), Some(have)) => !want.is_empty() && want.eq_ignore_ascii_case(have),
            _ => false,
        };
        let by_name = match (&self.name, &adv.name) {
            (Some(want), Some(have)) => {
                !want.is_empty() && have.to_uppercase().contains(&want.to_uppercase())
            }
            _ => false,
        };
        let by_service = self
            .service
            .map(|uuid| adv.services.contains(&uuid))
            .unwrap_or(false);
        by_address || by_name || by_service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_NUS_SERVICE;

    fn microbit_filter() -> ScanFilter {
        ScanFilter {
            name: Some("BBC MICRO:BIT".into()),
            service: Some(UUID_NUS_SERVICE),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_match_is_case_insensitive_substring() {
        let adv = Advertisement {
            name: Some("BBC micro:bit [zovet]".into()),
            ..Default::default()
        };
        assert!(microbit_filter().matches(&adv));
    }

    #[test]
    fn test_service_uuid_match_without_name() {
        let adv = Advertisement {
            services: vec![UUID_NUS_SERVICE],
            ..Default::default()
        };
        assert!(microbit_filter().matches(&adv));
        assert!(!microbit_filter().matches(&Advertisement::default()));
    }

    #[test]
    fn test_address_match() {
        let filter = ScanFilter {
            address: Some("c8:9c:3a:28:77:ab".into()),
            ..Default::default()
        };
        let adv = Advertisement {
            address: Some("C8:9C:3A:28:77:AB".into()),
            ..Default::default()
        };
        assert!(filter.matches(&adv));
    }

    #[test]
    fn test_min_rssi_rejects_weak_results() {
        let filter = ScanFilter {
            min_rssi: Some(-85),
            ..microbit_filter()
        };
        let mut adv = Advertisement {
            name: Some("BBC MICRO:BIT".into()),
            rssi: Some(-90),
            ..Default::default()
        };
        assert!(!filter.matches(&adv));
        adv.rssi = Some(-60);
        assert!(filter.matches(&adv));
    }

    #[test]
    fn test_service_range_contains() {
        let range = ServiceRange {
            uuid: UUID_NUS_SERVICE,
            start: AttrHandle(10),
            end: AttrHandle(16),
        };
        assert!(range.contains(AttrHandle(10)));
        assert!(range.contains(AttrHandle(16)));
        assert!(!range.contains(AttrHandle(17)));
        assert_eq!(AttrHandle(u16::MAX).offset(1), None);
    }
}
