//! Detection and resolution of the bot-challenge widget.
//!
//! The widget renders its response element into the page, but the actual
//! control lives inside an iframe behind a shadow-rooted wrapper. The descent
//! is modeled as an ordered pipeline with a named failure at every stage so
//! a broken lookup can be pinpointed (and simulated in tests) rather than
//! collapsing into a single "not found".
//!
//! Resolution is idempotent: when the widget is absent, `resolve` touches
//! nothing and reports [`Resolution::NotPresent`]. Callers must not assume a
//! triggered widget means the page is usable; the widget can re-render after
//! any navigation, and the expected next element has to be re-verified.

use std::fmt;
use std::time::Duration;

use crate::browser::{DriverError, PageDriver, Selector};

/// The widget's response-carrying element; its presence is the detection
/// signal for the whole pipeline.
pub const RESPONSE_INPUT_CSS: &str = "[name=\"cf-turnstile-response\"]";

pub fn response_input() -> Selector {
    Selector::css(RESPONSE_INPUT_CSS)
}

/// Stages of the widget lookup, in descent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeStage {
    /// The response element rendered into the host page.
    ResponseInput,
    /// Its parent container.
    Wrapper,
    /// The embedded frame behind the wrapper's shadow root.
    Frame,
    /// The frame's document body.
    FrameBody,
    /// The actionable control inside the frame body.
    Trigger,
}

impl ChallengeStage {
    /// Probe script for this stage. Each script re-walks the chain from the
    /// response element so stages stay independent of one another; the final
    /// stage also invokes the control.
    pub fn script(self) -> &'static str {
        match self {
            ChallengeStage::ResponseInput => {
                r#"(() => !!document.querySelector('[name="cf-turnstile-response"]'))()"#
            }
            ChallengeStage::Wrapper => {
                r#"(() => { const response = document.querySelector('[name="cf-turnstile-response"]');
                    return !!(response && response.parentElement); })()"#
            }
            ChallengeStage::Frame => {
                r#"(() => { const response = document.querySelector('[name="cf-turnstile-response"]');
                    const wrapper = response && response.parentElement;
                    const root = wrapper && wrapper.shadowRoot;
                    return !!(root && root.querySelector('iframe')); })()"#
            }
            ChallengeStage::FrameBody => {
                r#"(() => { const response = document.querySelector('[name="cf-turnstile-response"]');
                    const wrapper = response && response.parentElement;
                    const root = wrapper && wrapper.shadowRoot;
                    const frame = root && root.querySelector('iframe');
                    const doc = frame && frame.contentDocument;
                    return !!(doc && doc.body); })()"#
            }
            ChallengeStage::Trigger => {
                r#"(() => { const response = document.querySelector('[name="cf-turnstile-response"]');
                    const wrapper = response && response.parentElement;
                    const root = wrapper && wrapper.shadowRoot;
                    const frame = root && root.querySelector('iframe');
                    const doc = frame && frame.contentDocument;
                    const control = doc && doc.body && doc.body.querySelector('input');
                    if (!control) return false;
                    control.click();
                    return true; })()"#
            }
        }
    }
}

impl fmt::Display for ChallengeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChallengeStage::ResponseInput => "response-input",
            ChallengeStage::Wrapper => "wrapper",
            ChallengeStage::Frame => "frame",
            ChallengeStage::FrameBody => "frame-body",
            ChallengeStage::Trigger => "trigger",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("challenge widget lookup failed at stage {stage}")]
    StageFailed { stage: ChallengeStage },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// What a `resolve` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No widget on the page; nothing was touched.
    NotPresent,
    /// The bypass control was invoked.
    Triggered,
}

/// Resolves the challenge widget when it is present on the current page.
#[derive(Debug, Clone)]
pub struct ChallengeResolver {
    render_timeout: Duration,
}

impl Default for ChallengeResolver {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(10),
        }
    }
}

impl ChallengeResolver {
    const DESCENT: [ChallengeStage; 4] = [
        ChallengeStage::Wrapper,
        ChallengeStage::Frame,
        ChallengeStage::FrameBody,
        ChallengeStage::Trigger,
    ];

    pub fn new(render_timeout: Duration) -> Self {
        Self { render_timeout }
    }

    pub async fn resolve(&self, page: &dyn PageDriver) -> Result<Resolution, ChallengeError> {
        if !page.find(&response_input()).await? {
            return Ok(Resolution::NotPresent);
        }

        tracing::info!("Challenge widget detected, waiting for it to render");
        page.wait_for(&response_input(), self.render_timeout)
            .await
            .map_err(|_| ChallengeError::StageFailed {
                stage: ChallengeStage::ResponseInput,
            })?;

        for stage in Self::DESCENT {
            let value = page.eval(stage.script()).await?;
            if !value.as_bool().unwrap_or(false) {
                return Err(ChallengeError::StageFailed { stage });
            }
        }

        tracing::info!("Challenge widget triggered");
        Ok(Resolution::Triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(ChallengeStage::ResponseInput.to_string(), "response-input");
        assert_eq!(ChallengeStage::Trigger.to_string(), "trigger");
    }

    #[test]
    fn descent_scripts_walk_the_documented_chain() {
        assert!(ChallengeStage::Wrapper.script().contains("parentElement"));
        assert!(ChallengeStage::Frame.script().contains("shadowRoot"));
        assert!(ChallengeStage::FrameBody.script().contains("contentDocument"));
        assert!(ChallengeStage::Trigger.script().contains("control.click()"));
    }
}
