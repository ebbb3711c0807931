//! Section gating
//!
//! Every console section except the login screen needs an authenticated
//! session; the admin section additionally needs the `admin` role.

use super::Session;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Login,
    Dashboard,
    Agents,
    Tasks,
    History,
    Admin,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Login,
        Section::Dashboard,
        Section::Agents,
        Section::Tasks,
        Section::History,
        Section::Admin,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::Dashboard => "Dashboard",
            Self::Agents => "Agents",
            Self::Tasks => "Tasks",
            Self::History => "History",
            Self::Admin => "Admin",
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Self::Login)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Result of a section check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Redirect(Section),
}

impl Access {
    pub fn check(section: Section, session: &Session) -> Access {
        if section.requires_session() && !session.is_authenticated() {
            return Access::Redirect(Section::Login);
        }
        if section.requires_admin() && !session.is_admin() {
            return Access::Redirect(Section::Dashboard);
        }
        Access::Allowed
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }

    /// Sections to offer in navigation for this session
    pub fn navigation(session: &Session) -> Vec<Section> {
        if !session.is_authenticated() {
            return vec![Section::Login];
        }
        Section::ALL
            .into_iter()
            .filter(|s| *s != Section::Login)
            .filter(|s| Access::check(*s, session).is_allowed())
            .collect()
    }
}
