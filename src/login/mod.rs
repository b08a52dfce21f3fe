//! The login orchestration state machine.
//!
//! One execution drives a browser tab through the target site's login UI and
//! terminates in exactly one [`LoginOutcome`]. The current step is a value
//! threaded through the drive loop, never shared state; concurrent executions
//! cannot observe each other's progress.

mod machine;

pub use machine::{labels, reasons, selectors, LoginMachine, SESSION_ENDPOINT, SITE_ROOT};

use std::fmt;

/// Stages of the login flow, in forward order. The only sideways move is
/// `PasswordEntry -> AlternateEmailEntry`, taken when the site reports an SSO
/// failure on its primary auth path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SiteLoad,
    AccountChooser,
    EmailEntry,
    AlternateEmailEntry,
    PasswordEntry,
    TokenRetrieval,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::SiteLoad => "site-load",
            Step::AccountChooser => "account-chooser",
            Step::EmailEntry => "email-entry",
            Step::AlternateEmailEntry => "alternate-email-entry",
            Step::PasswordEntry => "password-entry",
            Step::TokenRetrieval => "token-retrieval",
        };
        f.write_str(name)
    }
}

/// Terminal result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success { access_token: String },
    Failure { reason: String },
}

impl LoginOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }
}
