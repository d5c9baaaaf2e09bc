//! Location tagging for evidence bundles.

use blackbox_common::Location;

/// Supplies the current location, if known.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<Location>;
}

/// Reports a configured position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

impl FixedLocation {
    /// A configured position is never a live fix.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self(Location {
            lat,
            lng,
            valid: false,
        })
    }
}

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<Location> {
        Some(self.0)
    }
}

/// No location source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn current_location(&self) -> Option<Location> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_location_is_not_a_live_fix() {
        let location = FixedLocation::new(37.7749, -122.4194).current_location().unwrap();
        assert_eq!(location.lat, 37.7749);
        assert!(!location.valid);
        assert!(NoLocation.current_location().is_none());
    }
}
