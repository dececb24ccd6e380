//! Subscription filters selectable by the user.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::protocol::{Command, FilterCriterion};

/// Server-side restriction on which instances are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Filter {
    #[default]
    AllInstances,
    RegisteredOnly,
    UnregisteredOnly,
}

impl Filter {
    /// The criterion carried by the outbound `Filter` command.
    ///
    /// `AllInstances` is a reset signal, not `Registered: <bool>`.
    pub fn criterion(self) -> FilterCriterion {
        match self {
            Filter::AllInstances => FilterCriterion::Reset(true),
            Filter::RegisteredOnly => FilterCriterion::Registered(true),
            Filter::UnregisteredOnly => FilterCriterion::Registered(false),
        }
    }

    pub fn command(self) -> Command {
        Command::Filter(self.criterion())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::AllInstances => "All",
            Filter::RegisteredOnly => "RegisteredOnly",
            Filter::UnregisteredOnly => "UnregisteredOnly",
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = ProtoError;

    /// Accepts the filter UI values (`All`, `RegisteredOnly`,
    /// `UnregisteredOnly`) in any case, plus short aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "allinstances" => Ok(Filter::AllInstances),
            "registeredonly" | "registered" => Ok(Filter::RegisteredOnly),
            "unregisteredonly" | "unregistered" => Ok(Filter::UnregisteredOnly),
            _ => Err(ProtoError::UnknownFilter(s.to_string())),
        }
    }
}
