use serde::{Deserialize, Serialize};

/// Roles a subject's token may carry. Mutation privilege belongs to `Admin`
/// and `Referee`; every other role may only subscribe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Organizer,
    Competitor,
    Referee,
    Coach,
}

impl Role {
    pub fn can_mutate(self) -> bool {
        matches!(self, Role::Admin | Role::Referee)
    }

    /// Parses a role claim string, dropping anything unrecognized rather
    /// than failing the whole token (spec §4.1: "Unknown role strings are
    /// dropped").
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "organizer" => Some(Role::Organizer),
            "competitor" => Some(Role::Competitor),
            "referee" => Some(Role::Referee),
            "coach" => Some(Role::Coach),
            _ => None,
        }
    }
}

/// The requested connection mode from the `?role=` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedRole {
    Referee,
    Viewer,
}

impl RequestedRole {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(r) if r.eq_ignore_ascii_case("referee") => RequestedRole::Referee,
            _ => RequestedRole::Viewer,
        }
    }
}
