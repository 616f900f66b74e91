use crate::domain::errors::LinkError;
use serde::Deserialize;
use std::fmt;

/// Turn direction carried by a navigation cue.
///
/// On the wire each direction is a single arrow glyph, never an English word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Direction {
    #[serde(rename = "←")]
    Left,
    #[serde(rename = "→")]
    Right,
    #[serde(rename = "↑")]
    Straight,
}

impl Direction {
    /// The glyph the peripheral firmware renders for this direction.
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Left => "←",
            Self::Right => "→",
            Self::Straight => "↑",
        }
    }

    /// Map a routing maneuver name (e.g. `turn-slight-left`) to a direction.
    /// Anything that is not a left or right turn is treated as straight.
    pub fn from_maneuver(maneuver: &str) -> Self {
        if maneuver.contains("left") {
            Self::Left
        } else if maneuver.contains("right") {
            Self::Right
        } else {
            Self::Straight
        }
    }
}

/// A message pushed to the glasses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Time {
        #[serde(rename = "time")]
        hhmm: String,
    },
    Notify {
        app: String,
        title: String,
    },
    Nav {
        direction: Direction,
        distance: String,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Time { .. } => "time",
            Self::Notify { .. } => "notify",
            Self::Nav { .. } => "nav",
        }
    }
}

/// One step of a route, as produced by a [`RouteProvider`](crate::domain::ports::RouteProvider).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationStep {
    pub direction: Direction,
    pub distance: String,
    pub instruction: String,
}

impl NavigationStep {
    pub fn new(direction: Direction, distance: &str, instruction: &str) -> Self {
        Self {
            direction,
            distance: distance.to_string(),
            instruction: instruction.to_string(),
        }
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage::Nav {
            direction: self.direction,
            distance: self.distance.clone(),
        }
    }
}

/// Lifecycle of the link to the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Ready,
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::ServiceDiscovery => "discovering services",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Events reported upward to whoever drives the application.
#[derive(Debug, Clone)]
pub enum AppEvent {
    LinkState(LinkState),
    LinkError(LinkError),
    NavigationStep {
        index: usize,
        total: usize,
        instruction: String,
    },
    NavigationComplete,
    NavigationStopped,
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
