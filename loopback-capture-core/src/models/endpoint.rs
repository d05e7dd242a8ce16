use std::fmt;

use serde::{Deserialize, Serialize};

/// Endpoint state bits, numerically identical to the platform's device-state mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointStates(u32);

impl EndpointStates {
    pub const ACTIVE: Self = Self(0x1);
    pub const DISABLED: Self = Self(0x2);
    pub const NOT_PRESENT: Self = Self(0x4);
    pub const UNPLUGGED: Self = Self(0x8);

    /// Filter used by the diagnostic listing: everything except not-present endpoints.
    pub const DIAGNOSTIC: Self = Self(Self::ACTIVE.0 | Self::DISABLED.0 | Self::UNPLUGGED.0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for EndpointStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::ACTIVE, "ACTIVE"),
            (Self::DISABLED, "DISABLED"),
            (Self::NOT_PRESENT, "NOTPRESENT"),
            (Self::UNPLUGGED, "UNPLUGGED"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Hardware capability mask reported by the endpoint's volume interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareSupport(u32);

impl HardwareSupport {
    pub const VOLUME: Self = Self(0x1);
    pub const MUTE: Self = Self(0x2);
    pub const METER: Self = Self(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for HardwareSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [(Self::VOLUME, "VOLUME"), (Self::MUTE, "MUTE"), (Self::METER, "METER")];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Symbolic endpoint role resolved through the platform's default-endpoint query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointRole {
    #[default]
    Default,
    DefaultCommunications,
}

/// One discoverable output endpoint.
///
/// Only `id` is stable across refreshes; list positions are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: String,
    pub name: String,
    pub state: EndpointStates,
    pub hardware_support: HardwareSupport,
}

impl EndpointDescriptor {
    pub fn is_active(&self) -> bool {
        self.state.contains(EndpointStates::ACTIVE)
    }
}

/// How the capture source was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Position in the last enumerated list, re-resolved at use time.
    ByIndex(u16),
    ByRole(EndpointRole),
}

/// The logical capture-source choice plus its last resolution.
///
/// `stale` is raised whenever the endpoint list is refreshed; a by-index
/// selection must then be resolved again before it is used.
#[derive(Debug, Clone)]
pub struct DeviceSelection<E> {
    pub mode: SelectionMode,
    pub resolved: Option<E>,
    pub stale: bool,
}

impl<E> DeviceSelection<E> {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            resolved: None,
            stale: true,
        }
    }

    pub fn resolve(&mut self, endpoint: E) {
        self.resolved = Some(endpoint);
        self.stale = false;
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_filter_excludes_not_present() {
        assert!(EndpointStates::DIAGNOSTIC.contains(EndpointStates::ACTIVE));
        assert!(EndpointStates::DIAGNOSTIC.contains(EndpointStates::UNPLUGGED));
        assert!(!EndpointStates::DIAGNOSTIC.intersects(EndpointStates::NOT_PRESENT));
    }

    #[test]
    fn states_display_lists_flags() {
        let states = EndpointStates::ACTIVE.union(EndpointStates::UNPLUGGED);
        assert_eq!(states.to_string(), "ACTIVE|UNPLUGGED");
        assert_eq!(EndpointStates::default().to_string(), "NONE");
    }

    #[test]
    fn hardware_support_display_lists_capabilities() {
        let support = HardwareSupport::VOLUME.union(HardwareSupport::METER);
        assert!(support.contains(HardwareSupport::METER));
        assert!(!support.contains(HardwareSupport::MUTE));
        assert_eq!(support.bits(), 0x5);
        assert_eq!(support.to_string(), "VOLUME|METER");
        assert_eq!(HardwareSupport::default().to_string(), "NONE");
    }

    #[test]
    fn role_serializes_kebab_case() {
        let json = serde_json::to_string(&EndpointRole::DefaultCommunications).unwrap();
        assert_eq!(json, "\"default-communications\"");
    }

    #[test]
    fn new_selection_is_stale_until_resolved() {
        let mut selection: DeviceSelection<u32> = DeviceSelection::new(SelectionMode::ByIndex(1));
        assert!(selection.stale);
        selection.resolve(7);
        assert!(!selection.stale);
        assert_eq!(selection.resolved, Some(7));
        selection.mark_stale();
        assert!(selection.stale);
    }
}
