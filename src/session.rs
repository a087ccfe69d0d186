//! Login: fill the portal's form and wait until the session is authenticated.

use std::path::Path;
use std::time::{Duration, Instant};

use secrecy::ExposeSecret;

use crate::browser::{capture_diagnostic, BrowserSession, ERROR_SCREENSHOT};
use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::provider::Provider;

/// Log in once. On failure, a screenshot is saved to
/// `{output_dir}/error_screenshot.png` before the error is returned.
pub async fn authenticate(
    session: &dyn BrowserSession,
    provider: &Provider,
    credentials: &Credentials,
    timeout: Duration,
    output_dir: &Path,
) -> Result<(), AuthError> {
    let result = login(session, provider, credentials, timeout).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "Login failed");
        capture_diagnostic(session, &output_dir.join(ERROR_SCREENSHOT)).await;
    }
    result
}

/// Submit the login form and wait for the post-login indicator.
///
/// There is exactly one attempt. A challenge prompt (MFA, email verification)
/// ends the attempt immediately.
pub async fn login(
    session: &dyn BrowserSession,
    provider: &Provider,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<(), AuthError> {
    tracing::info!(provider = provider.display_name, url = provider.login_url, "Navigating to login");
    session.goto(provider.login_url).await.map_err(AuthError::Browser)?;
    settle(provider).await;

    // Landing pages put the form behind a "Log in" button.
    if !identity_visible(session, provider).await?
        && session.click(provider.landing_login).await.map_err(AuthError::Browser)?
    {
        tracing::debug!("Opened login form from landing page");
        settle(provider).await;
    }

    if !identity_visible(session, provider).await?
        && session
            .click(provider.continue_with_email)
            .await
            .map_err(AuthError::Browser)?
    {
        tracing::debug!("Switched to email login");
        settle(provider).await;
    }

    tracing::info!(identity = %credentials.masked_identity(), "Entering identity");
    if !session
        .fill(provider.identity_input, credentials.identity().expose_secret())
        .await
        .map_err(AuthError::Browser)?
    {
        return Err(AuthError::MissingField {
            field: "identity input",
        });
    }
    if !session
        .click(provider.identity_submit)
        .await
        .map_err(AuthError::Browser)?
    {
        return Err(AuthError::MissingField {
            field: "continue button",
        });
    }
    settle(provider).await;

    tracing::info!("Entering secret");
    if !session
        .fill(provider.secret_input, credentials.secret().expose_secret())
        .await
        .map_err(AuthError::Browser)?
    {
        return Err(AuthError::MissingField {
            field: "password input",
        });
    }
    if !session
        .click(provider.secret_submit)
        .await
        .map_err(AuthError::Browser)?
    {
        return Err(AuthError::MissingField {
            field: "log in button",
        });
    }

    tracing::info!(timeout_secs = timeout.as_secs(), "Waiting for login to complete");
    wait_for_login(session, provider, timeout).await?;
    settle(provider).await;

    tracing::info!("Login successful");
    Ok(())
}

async fn wait_for_login(
    session: &dyn BrowserSession,
    provider: &Provider,
    timeout: Duration,
) -> Result<(), AuthError> {
    let start = Instant::now();
    loop {
        let url = session.current_url().await.map_err(AuthError::Browser)?;

        if let Some(url) = url.as_deref() {
            if provider.is_challenge_url(url) {
                return Err(AuthError::ChallengeDetected {
                    url: url.to_string(),
                });
            }
        }
        if session
            .exists(provider.challenge_markers)
            .await
            .map_err(AuthError::Browser)?
        {
            return Err(AuthError::ChallengeDetected {
                url: url.unwrap_or_default(),
            });
        }

        if url.as_deref().is_some_and(|u| provider.is_post_login_url(u)) {
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(AuthError::Timeout { waited: timeout, url });
        }
        tokio::time::sleep(provider.poll_interval).await;
    }
}

async fn identity_visible(
    session: &dyn BrowserSession,
    provider: &Provider,
) -> Result<bool, AuthError> {
    session
        .exists(provider.identity_input)
        .await
        .map_err(AuthError::Browser)
}

async fn settle(provider: &Provider) {
    if !provider.settle.is_zero() {
        tokio::time::sleep(provider.settle).await;
    }
}
