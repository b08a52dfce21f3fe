use std::time::Duration;

use anyhow::Result;
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::browser::{DriverError, PageDriver, Selector};
use crate::challenge::{ChallengeResolver, Resolution};
use crate::credentials::Credentials;
use crate::snapshot::SnapshotSink;

use super::{LoginOutcome, Step};

pub const SITE_ROOT: &str = "https://chatgpt.com";
pub const SESSION_ENDPOINT: &str = "https://chatgpt.com/api/auth/session";

const TOKEN_FIELD: &str = "accessToken";

/// Messages the site renders when its primary auth path cannot serve the
/// account. Served in either language depending on the session locale.
const SSO_ERROR_MARKERS: [&str; 2] = [
    "获取您的 SSO 信息时出错",
    "Something went wrong while getting your SSO info",
];

// The landing page can be very slow behind a proxy; everything else renders
// quickly once the page is up.
const SITE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);
const LANDMARK_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

const INPUT_SETTLE: Duration = Duration::from_secs(1);
const SUBMIT_SETTLE: Duration = Duration::from_secs(2);
const HANDOFF_SETTLE: Duration = Duration::from_secs(5);

/// Element addresses on the target site.
pub mod selectors {
    use crate::browser::Selector;

    /// The chat composer; marks the landing page (and the post-login page)
    /// as loaded.
    pub fn composer() -> Selector {
        Selector::css("textarea")
    }

    /// Sign-in button on the alternate landing UI.
    pub fn variant_signin() -> Selector {
        Selector::css(".btn.relative.btn-blue.btn-large")
    }

    /// Dark sign-in button on the classic landing UI. The site renders it
    /// without ids or test hooks, hence the absolute path.
    pub fn signin_dark() -> Selector {
        Selector::xpath(
            "/html/body/div[1]/div[1]/main/div[1]/div[1]/div/div[1]/div/div[3]/div/button[1]",
        )
    }

    pub fn signin_labeled() -> Selector {
        Selector::css("[data-testid=\"login-button\"]")
    }

    pub fn signup() -> Selector {
        Selector::css(".btn.relative.btn-secondary.btn-small")
    }

    /// "Go to sign in" link on the registration view.
    pub fn signin_link() -> Selector {
        Selector::css(".other-page-link")
    }

    pub fn email_input() -> Selector {
        Selector::css("#email-input")
    }

    /// Email field on the secondary auth subdomain.
    pub fn alternate_email_input() -> Selector {
        Selector::css("#email-or-phone-input")
    }

    pub fn continue_button() -> Selector {
        Selector::css(".continue-btn")
    }

    pub fn password_input() -> Selector {
        Selector::css("#password")
    }

    pub fn submit_button() -> Selector {
        Selector::css("[type=\"submit\"]")
    }

    /// Container the site renders auth status messages into.
    pub fn sso_wrapper() -> Selector {
        Selector::css(".content-wrapper")
    }

    pub fn landmark() -> Selector {
        Selector::text("What can I help with?")
    }

    pub fn verify_prompt() -> Selector {
        Selector::text("Resend email")
    }
}

/// Snapshot labels, one per named failure point.
pub mod labels {
    pub const LOGIN_PAGE_ERROR: &str = "login-page-error";
    pub const LOGIN_LINK_NOT_FOUND: &str = "login-link-not-found";
    pub const EMAIL_INPUT_ERROR: &str = "email-input-error";
    pub const SSO_ERROR: &str = "sso-error";
    pub const INPUT_PASSWORD_ERROR: &str = "input-password-error";
    pub const LOGIN_PROBLEM: &str = "login-problem";
    pub const TOKEN_PAGE: &str = "access-token-get-page";
    pub const TOKEN_NOT_FOUND: &str = "access-token-not-found";
    pub const CHALLENGE_ERROR: &str = "challenge-error";
}

/// Failure reasons returned to the API caller.
pub mod reasons {
    pub const SITE_LOAD: &str = "error loading the login page";
    pub const REGISTRATION_PATH: &str = "could not reach the sign-in form";
    pub const EMAIL_INPUT: &str = "error loading the email input";
    pub const SSO_ERROR: &str = "SSO error detected; please log in manually";
    pub const PASSWORD_INPUT: &str = "error entering the password";
    pub const LOGIN_PROBLEM: &str = "login may have run into a problem; check the credentials";
    pub const EMAIL_VERIFICATION: &str =
        "email verification code required; please complete login manually";
    pub const TOKEN_NOT_FOUND: &str = "access token not found; check the credentials";
}

enum Transition {
    Next(Step),
    Done(LoginOutcome),
}

/// What the landing page looked like once the initial wait ran out.
enum LandingProbe {
    /// Composer rendered; the classic landing page is up.
    Composer,
    /// The alternate landing UI rendered.
    VariantButton,
    /// The site navigated away from the root before either rendered.
    Redirected,
    /// Still on the root with nothing recognizable rendered.
    Missing,
}

/// Drives one login execution to a single terminal [`LoginOutcome`].
pub struct LoginMachine<'a> {
    page: &'a dyn PageDriver,
    credentials: &'a Credentials,
    snapshots: &'a SnapshotSink,
    resolver: ChallengeResolver,
}

impl<'a> LoginMachine<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        credentials: &'a Credentials,
        snapshots: &'a SnapshotSink,
    ) -> Self {
        Self {
            page,
            credentials,
            snapshots,
            resolver: ChallengeResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: ChallengeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run the flow to completion. Never errors past this boundary; anything
    /// the state table does not classify becomes a `Failure` carrying the
    /// error text.
    pub async fn execute(&self) -> LoginOutcome {
        let mut step = Step::SiteLoad;
        let mut completed: Option<Step> = None;
        // The SSO side branch is taken at most once per execution; a second
        // SSO error on the rewritten path is a dead end.
        let mut sso_rewritten = false;

        loop {
            tracing::info!(step = %step, "Entering step");

            let result = match step {
                Step::SiteLoad => self.site_load().await,
                Step::AccountChooser => self.account_chooser().await,
                Step::EmailEntry => self.enter_email(selectors::email_input()).await,
                Step::AlternateEmailEntry => {
                    self.enter_email(selectors::alternate_email_input()).await
                }
                Step::PasswordEntry => self.password_entry(sso_rewritten).await,
                Step::TokenRetrieval => self.token_retrieval().await,
            };

            match result {
                Ok(Transition::Next(next)) => {
                    if next == Step::AlternateEmailEntry {
                        sso_rewritten = true;
                    }
                    completed = Some(step);
                    step = next;
                }
                Ok(Transition::Done(outcome)) => return outcome,
                Err(err) if step == Step::SiteLoad && completed.is_none() => {
                    // Heuristic from observed site behavior: an error this
                    // early almost always means the site redirected to the
                    // email form before the landing page finished rendering.
                    let detail = format!("{err:#}");
                    tracing::warn!(
                        error = %detail,
                        "Site-load failed before any progress; assuming an early redirect to email entry"
                    );
                    step = Step::EmailEntry;
                }
                Err(err) => {
                    let detail = format!("{err:#}");
                    tracing::error!(step = %step, error = %detail, "Unexpected error");
                    return LoginOutcome::failure(format!(
                        "unexpected error during {step}: {detail}"
                    ));
                }
            }
        }
    }

    // --- steps ---------------------------------------------------------

    async fn site_load(&self) -> Result<Transition> {
        self.page.navigate(SITE_ROOT).await?;

        match self.probe_landing().await? {
            LandingProbe::Composer | LandingProbe::VariantButton => {
                Ok(Transition::Next(Step::AccountChooser))
            }
            LandingProbe::Redirected => {
                tracing::info!("Landing page skipped ahead; jumping to email entry");
                Ok(Transition::Next(Step::EmailEntry))
            }
            LandingProbe::Missing => self.fail(labels::LOGIN_PAGE_ERROR, reasons::SITE_LOAD).await,
        }
    }

    async fn probe_landing(&self) -> Result<LandingProbe> {
        match self
            .page
            .wait_for(&selectors::composer(), SITE_LOAD_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(DriverError::Timeout { .. }) | Err(DriverError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        if self.resolve_challenge().await? == Resolution::Triggered {
            // Give the page a chance to swap the widget for the real content.
            let _ = self
                .page
                .wait_for(&selectors::composer(), ELEMENT_TIMEOUT)
                .await;
        }

        if self.page.find(&selectors::composer()).await? {
            return Ok(LandingProbe::Composer);
        }
        if self.page.find(&selectors::variant_signin()).await? {
            return Ok(LandingProbe::VariantButton);
        }

        let url = self.page.current_url().await?;
        if !url.starts_with(SITE_ROOT) {
            return Ok(LandingProbe::Redirected);
        }
        Ok(LandingProbe::Missing)
    }

    async fn account_chooser(&self) -> Result<Transition> {
        match self.try_choose_account().await {
            Ok(true) => {
                self.page.settle(HANDOFF_SETTLE).await;
                Ok(Transition::Next(Step::EmailEntry))
            }
            Ok(false) => {
                self.fail(labels::LOGIN_LINK_NOT_FOUND, reasons::REGISTRATION_PATH)
                    .await
            }
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::warn!(error = %detail, "Account chooser failed");
                self.fail(labels::LOGIN_LINK_NOT_FOUND, reasons::REGISTRATION_PATH)
                    .await
            }
        }
    }

    /// Try to reach the email form, returning whether a sign-in control was
    /// clicked. The site A/B-tests the landing page, and on the variant that
    /// only offers registration the sign-in link lives behind the sign-up
    /// view.
    async fn try_choose_account(&self) -> Result<bool> {
        let _ = self
            .page
            .wait_for(&selectors::signin_dark(), ELEMENT_TIMEOUT)
            .await;

        for control in [selectors::signin_dark(), selectors::signin_labeled()] {
            if self.page.find(&control).await? {
                match self.page.click(&control).await {
                    Ok(()) => {
                        tracing::info!(control = %control, "Clicked sign-in control");
                        return Ok(true);
                    }
                    Err(err) => {
                        // Typically "element has no size": the control exists
                        // in the DOM of the other variant but is not usable.
                        tracing::debug!(control = %control, error = %err, "Sign-in control unusable");
                    }
                }
            }
        }

        self.resolve_challenge().await?;

        if self
            .page
            .wait_for(&selectors::signup(), ELEMENT_TIMEOUT)
            .await
            .is_ok()
        {
            if let Err(err) = self.page.click(&selectors::signup()).await {
                tracing::debug!(error = %err, "Sign-up control did not accept the click");
            }
        }

        self.resolve_challenge().await?;

        for attempt in 0..2 {
            if self
                .page
                .wait_for(&selectors::signin_link(), ELEMENT_TIMEOUT)
                .await
                .is_ok()
            {
                self.page.click(&selectors::signin_link()).await?;
                tracing::info!("Followed the sign-in link from the registration view");
                return Ok(true);
            }
            if attempt == 0 {
                self.resolve_challenge().await?;
            }
        }

        Ok(false)
    }

    async fn enter_email(&self, field: Selector) -> Result<Transition> {
        match self.try_enter_email(&field).await {
            Ok(()) => {
                self.page.settle(HANDOFF_SETTLE).await;
                Ok(Transition::Next(Step::PasswordEntry))
            }
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::warn!(field = %field, error = %detail, "Email entry failed");
                self.fail(labels::EMAIL_INPUT_ERROR, reasons::EMAIL_INPUT)
                    .await
            }
        }
    }

    async fn try_enter_email(&self, field: &Selector) -> Result<()> {
        self.resolve_challenge().await?;
        self.page.wait_for(field, ELEMENT_TIMEOUT).await?;
        self.page.type_text(field, &self.credentials.email).await?;
        self.page.settle(INPUT_SETTLE).await;
        self.page.click(&selectors::continue_button()).await?;
        Ok(())
    }

    async fn password_entry(&self, sso_rewritten: bool) -> Result<Transition> {
        if let Err(err) = self.resolve_challenge().await {
            let detail = format!("{err:#}");
            tracing::warn!(error = %detail, "Challenge blocked the password form");
            return self
                .fail(labels::INPUT_PASSWORD_ERROR, reasons::PASSWORD_INPUT)
                .await;
        }

        if let Some(transition) = self.check_sso_error(sso_rewritten).await? {
            return Ok(transition);
        }

        match self.try_enter_password().await {
            Ok(()) => {
                self.page.settle(HANDOFF_SETTLE).await;
                Ok(Transition::Next(Step::TokenRetrieval))
            }
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::warn!(error = %detail, "Password entry failed");
                self.fail(labels::INPUT_PASSWORD_ERROR, reasons::PASSWORD_INPUT)
                    .await
            }
        }
    }

    /// Detect the site-reported SSO failure and, once per execution, rewrite
    /// the auth segment of the current URL to the alternate auth path.
    async fn check_sso_error(&self, sso_rewritten: bool) -> Result<Option<Transition>> {
        match self
            .page
            .wait_for(&selectors::sso_wrapper(), ELEMENT_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(DriverError::Timeout { .. }) | Err(DriverError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let text = self
            .page
            .text_of(&selectors::sso_wrapper())
            .await
            .unwrap_or_default();
        if !SSO_ERROR_MARKERS.iter().any(|marker| text.contains(marker)) {
            return Ok(None);
        }

        let url = self.page.current_url().await?;
        tracing::warn!(url = %url, "Site reported an SSO error");

        if sso_rewritten || !url.contains("auth") {
            return self
                .fail(labels::SSO_ERROR, reasons::SSO_ERROR)
                .await
                .map(Some);
        }

        let rewritten = url.replacen("auth", "auth0", 1);
        tracing::info!(url = %rewritten, "Retrying via the alternate auth path");
        self.page.navigate(&rewritten).await?;
        Ok(Some(Transition::Next(Step::AlternateEmailEntry)))
    }

    async fn try_enter_password(&self) -> Result<()> {
        if self
            .page
            .wait_for(&selectors::password_input(), ELEMENT_TIMEOUT)
            .await
            .is_err()
        {
            // The widget may be masking the form; resolve and retry once.
            self.resolve_challenge().await?;
            self.page
                .wait_for(&selectors::password_input(), ELEMENT_TIMEOUT)
                .await?;
        }

        self.page
            .type_text(
                &selectors::password_input(),
                self.credentials.password.expose_secret(),
            )
            .await?;
        self.page.settle(SUBMIT_SETTLE).await;
        self.page.click(&selectors::submit_button()).await?;
        Ok(())
    }

    async fn token_retrieval(&self) -> Result<Transition> {
        if self
            .page
            .wait_for(&selectors::landmark(), LANDMARK_TIMEOUT)
            .await
            .is_err()
        {
            return self.fail(labels::LOGIN_PROBLEM, reasons::LOGIN_PROBLEM).await;
        }
        tracing::info!("Post-login landmark found");

        if self
            .page
            .wait_for(&selectors::verify_prompt(), VERIFY_PROMPT_TIMEOUT)
            .await
            .is_ok()
        {
            // Mail-based verification cannot be automated.
            return Ok(Transition::Done(LoginOutcome::failure(
                reasons::EMAIL_VERIFICATION,
            )));
        }

        let tab = match self.page.open_tab(SESSION_ENDPOINT).await {
            Ok(tab) => tab,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to open the session endpoint");
                return self
                    .fail(labels::TOKEN_NOT_FOUND, reasons::TOKEN_NOT_FOUND)
                    .await;
            }
        };
        tab.settle(HANDOFF_SETTLE).await;

        // Kept even on success; the session payload is the artifact most
        // often needed when a token later turns out to be invalid.
        self.snapshot_page(tab.as_ref(), labels::TOKEN_PAGE).await;

        let body = match tab.body_json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %err, "Session endpoint did not return JSON");
                return self
                    .fail_on(tab.as_ref(), labels::TOKEN_NOT_FOUND, reasons::TOKEN_NOT_FOUND)
                    .await;
            }
        };

        match body.get(TOKEN_FIELD).and_then(Value::as_str) {
            Some(token) if !token.is_empty() => {
                tracing::info!("Login succeeded");
                Ok(Transition::Done(LoginOutcome::Success {
                    access_token: token.to_string(),
                }))
            }
            _ => {
                self.fail_on(tab.as_ref(), labels::TOKEN_NOT_FOUND, reasons::TOKEN_NOT_FOUND)
                    .await
            }
        }
    }

    // --- helpers -------------------------------------------------------

    /// Resolve the challenge widget if present. On resolver failure the page
    /// is snapshotted before the error propagates to the calling step.
    async fn resolve_challenge(&self) -> Result<Resolution> {
        match self.resolver.resolve(self.page).await {
            Ok(resolution) => Ok(resolution),
            Err(err) => {
                self.snapshot(labels::CHALLENGE_ERROR).await;
                Err(anyhow::Error::new(err).context("challenge resolution failed"))
            }
        }
    }

    async fn fail(&self, label: &str, reason: &str) -> Result<Transition> {
        self.fail_on(self.page, label, reason).await
    }

    async fn fail_on(
        &self,
        page: &dyn PageDriver,
        label: &str,
        reason: &str,
    ) -> Result<Transition> {
        self.snapshot_page(page, label).await;
        Ok(Transition::Done(LoginOutcome::failure(reason)))
    }

    async fn snapshot(&self, label: &str) {
        self.snapshot_page(self.page, label).await;
    }

    async fn snapshot_page(&self, page: &dyn PageDriver, label: &str) {
        match page.html().await {
            Ok(html) => match self.snapshots.save(label, &html) {
                Ok(path) => tracing::debug!(path = %path.display(), "Saved page snapshot"),
                Err(err) => {
                    let detail = format!("{err:#}");
                    tracing::warn!(label, error = %detail, "Failed to write page snapshot");
                }
            },
            Err(err) => {
                tracing::warn!(label, error = %err, "Failed to capture page markup");
            }
        }
    }
}
