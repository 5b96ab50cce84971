// SPDX-License-Identifier: MIT

//! Externally observed events
//!
//! Events are immutable values. Equality and hashing are structural over
//! type, component info and extras, which is what batch de-duplication uses.

use crate::engine::applet::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Matches no event, not even itself
    Undefined,
    /// A new package came to the foreground; always paired with `PackageExited`
    PackageEntered,
    PackageExited,
    ContentChanged,
    NotificationReceived,
    NewWindow,
    PrimaryClipChanged,
    Tick,
    ToastReceived,
    FileCreated,
    FileDeleted,
    WifiConnected,
    WifiDisconnected,
    NetworkAvailable,
    NetworkUnavailable,
}

impl EventType {
    /// Stable numeric code used in persisted trees
    pub fn code(self) -> i32 {
        match self {
            EventType::Undefined => -1,
            EventType::PackageEntered => 1,
            EventType::PackageExited => 2,
            EventType::ContentChanged => 3,
            EventType::NotificationReceived => 4,
            EventType::NewWindow => 5,
            EventType::PrimaryClipChanged => 6,
            EventType::Tick => 7,
            EventType::ToastReceived => 8,
            EventType::FileCreated => 9,
            EventType::FileDeleted => 10,
            EventType::WifiConnected => 11,
            EventType::WifiDisconnected => 12,
            EventType::NetworkAvailable => 13,
            EventType::NetworkUnavailable => 14,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => EventType::PackageEntered,
            2 => EventType::PackageExited,
            3 => EventType::ContentChanged,
            4 => EventType::NotificationReceived,
            5 => EventType::NewWindow,
            6 => EventType::PrimaryClipChanged,
            7 => EventType::Tick,
            8 => EventType::ToastReceived,
            9 => EventType::FileCreated,
            10 => EventType::FileDeleted,
            11 => EventType::WifiConnected,
            12 => EventType::WifiDisconnected,
            13 => EventType::NetworkAvailable,
            14 => EventType::NetworkUnavailable,
            _ => return None,
        })
    }

    /// Whether a trigger declaring `self` reacts to an event of type `other`
    pub fn matches(self, other: EventType) -> bool {
        self != EventType::Undefined && self == other
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Undefined => "undefined",
            EventType::PackageEntered => "pkgEntered",
            EventType::PackageExited => "pkgExited",
            EventType::ContentChanged => "contentChanged",
            EventType::NotificationReceived => "statusBarNotificationReceived",
            EventType::NewWindow => "newWindow",
            EventType::PrimaryClipChanged => "primaryClipChanged",
            EventType::Tick => "tick",
            EventType::ToastReceived => "toastNotificationReceived",
            EventType::FileCreated => "fileCreated",
            EventType::FileDeleted => "fileDeleted",
            EventType::WifiConnected => "wifiConnected",
            EventType::WifiDisconnected => "wifiDisconnected",
            EventType::NetworkAvailable => "networkAvailable",
            EventType::NetworkUnavailable => "networkUnavailable",
        };
        write!(f, "{}", name)
    }
}

/// Foreground component at the time of the event
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentInfo {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default)]
    pub pane_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventType,
    #[serde(flatten)]
    component: ComponentInfo,
    /// Sparse, event-specific payload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extras: BTreeMap<u32, Value>,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            component: ComponentInfo::default(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_component(
        kind: EventType,
        package_name: Option<&str>,
        activity_name: Option<&str>,
        pane_title: Option<&str>,
    ) -> Self {
        Self {
            kind,
            component: ComponentInfo {
                package_name: package_name.map(str::to_string),
                activity_name: activity_name.map(str::to_string),
                pane_title: pane_title.map(str::to_string),
            },
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: u32, value: impl Into<Value>) -> Self {
        self.extras.insert(key, value.into());
        self
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn component(&self) -> &ComponentInfo {
        &self.component
    }

    pub fn package_name(&self) -> Option<&str> {
        self.component.package_name.as_deref()
    }

    pub fn extra(&self, key: u32) -> Option<&Value> {
        self.extras.get(&key)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(type={}, pkg={}, act={}, pane={})",
            self.kind,
            self.component.package_name.as_deref().unwrap_or("-"),
            self.component.activity_name.as_deref().unwrap_or("-"),
            self.component.pane_title.as_deref().unwrap_or("-"),
        )
    }
}

/// Drop structural duplicates, keeping the first occurrence
pub fn dedup_events(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 1..=14 {
            let kind = EventType::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(EventType::from_code(-1), None);
        assert_eq!(EventType::from_code(15), None);
    }

    #[test]
    fn test_undefined_matches_nothing() {
        assert!(!EventType::Undefined.matches(EventType::Undefined));
        assert!(EventType::Tick.matches(EventType::Tick));
        assert!(!EventType::Tick.matches(EventType::NewWindow));
    }

    #[test]
    fn test_structural_equality() {
        let a = Event::with_component(EventType::NewWindow, Some("pkg"), Some("Main"), None)
            .with_extra(1, "x");
        let b = Event::with_component(EventType::NewWindow, Some("pkg"), Some("Main"), None)
            .with_extra(1, "x");
        let c = Event::with_component(EventType::NewWindow, Some("pkg"), Some("Main"), None)
            .with_extra(1, "y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_dedup_keeps_order() {
        let enter = Event::with_component(EventType::PackageEntered, Some("a"), None, None);
        let exit = Event::with_component(EventType::PackageExited, Some("b"), None, None);
        let events = vec![enter.clone(), exit.clone(), enter.clone()];
        assert_eq!(dedup_events(events), vec![enter, exit]);
    }

    #[test]
    fn test_deserialize_flat_component() {
        let yaml = r#"
type: package_entered
package_name: com.example
pane_title: Login
"#;
        let event: Event = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(event.kind(), EventType::PackageEntered);
        assert_eq!(event.package_name(), Some("com.example"));
        assert_eq!(event.component().pane_title.as_deref(), Some("Login"));
        assert!(event.component().activity_name.is_none());
    }
}
