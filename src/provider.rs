//! Portal definitions: URLs, form selectors and login indicators.

use std::time::Duration;

use url::Url;

use crate::browser::ElementQuery;

/// Everything the pipeline needs to know about one billing portal.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Short name used in file names and object keys (`openai`).
    pub name: &'static str,
    pub display_name: &'static str,
    pub login_url: &'static str,
    pub billing_url: &'static str,
    /// Host the app lives on once logged in.
    pub app_host: &'static str,
    /// Paths on `app_host` that still belong to the login flow.
    pub login_paths: &'static [&'static str],
    /// Landing page button that opens the login form.
    pub landing_login: &'static [ElementQuery],
    /// Button revealing the email field when the form starts with SSO options.
    pub continue_with_email: &'static [ElementQuery],
    pub identity_input: &'static [ElementQuery],
    pub identity_submit: &'static [ElementQuery],
    pub secret_input: &'static [ElementQuery],
    pub secret_submit: &'static [ElementQuery],
    pub challenge_markers: &'static [ElementQuery],
    pub challenge_url_fragments: &'static [&'static str],
    /// Pause after navigation and form steps to let the page render.
    pub settle: Duration,
    pub poll_interval: Duration,
}

const LANDING_LOGIN: &[ElementQuery] = &[
    ElementQuery::with_text("button", "Log in"),
    ElementQuery::with_text("a", "Log in"),
];

const CONTINUE_WITH_EMAIL: &[ElementQuery] =
    &[ElementQuery::with_text("button", "Continue with email")];

const IDENTITY_INPUT: &[ElementQuery] = &[
    ElementQuery::css(r#"input[name="email"]"#),
    ElementQuery::css(r#"input[type="email"]"#),
    ElementQuery::css(r#"input[id="email"]"#),
];

const IDENTITY_SUBMIT: &[ElementQuery] = &[
    ElementQuery::with_text("button", "Continue"),
    ElementQuery::with_text("button", "Next"),
    ElementQuery::css(r#"button[type="submit"]"#),
];

const SECRET_INPUT: &[ElementQuery] = &[
    ElementQuery::css(r#"input[name="password"]"#),
    ElementQuery::css(r#"input[type="password"]"#),
];

const SECRET_SUBMIT: &[ElementQuery] = &[
    ElementQuery::with_text("button", "Continue"),
    ElementQuery::with_text("button", "Log in"),
    ElementQuery::css(r#"button[type="submit"]"#),
];

const CHALLENGE_MARKERS: &[ElementQuery] = &[
    ElementQuery::css(r#"input[autocomplete="one-time-code"]"#),
    ElementQuery::css(r#"input[name="code"]"#),
];

impl Provider {
    pub fn openai() -> Self {
        Self {
            name: "openai",
            display_name: "OpenAI",
            login_url: "https://platform.openai.com/login",
            billing_url: "https://platform.openai.com/settings/organization/billing/history",
            app_host: "platform.openai.com",
            login_paths: &["/login", "/auth"],
            landing_login: LANDING_LOGIN,
            continue_with_email: CONTINUE_WITH_EMAIL,
            identity_input: IDENTITY_INPUT,
            identity_submit: IDENTITY_SUBMIT,
            secret_input: SECRET_INPUT,
            secret_submit: SECRET_SUBMIT,
            challenge_markers: CHALLENGE_MARKERS,
            challenge_url_fragments: &["verif", "mfa"],
            settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Whether `url` is an app page reached after login.
    pub fn is_post_login_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        parsed
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(self.app_host))
            && !self
                .login_paths
                .iter()
                .any(|p| parsed.path().starts_with(p))
    }

    /// Whether `url` looks like a verification or MFA step.
    pub fn is_challenge_url(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.challenge_url_fragments
            .iter()
            .any(|fragment| lower.contains(fragment))
    }
}
