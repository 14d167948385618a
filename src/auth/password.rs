//! Password grant and refresh against the backend auth service

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::{self, BufRead, Write};

use super::{Session, SessionStore, StoredToken};
use crate::api::client::check_response;
use crate::config::Config;
use crate::models::Profile;

const ENV_PASSWORD: &str = "MATCHCHAT_PASSWORD";

/// Response from the auth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// Call `/auth/v1/token?grant_type=...` with the given JSON body.
async fn token_request(
    http: &reqwest::Client,
    config: &Config,
    grant_type: &str,
    body: &serde_json::Value,
) -> Result<TokenResponse> {
    let url = format!(
        "{}/auth/v1/token?grant_type={}",
        config.backend_url.trim_end_matches('/'),
        grant_type
    );
    tracing::debug!("Auth POST {}", url);

    let resp = http
        .post(&url)
        .header("apikey", &config.api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Auth POST {} failed", url))?;

    let resp = check_response(resp, &url).await?;
    resp.json()
        .await
        .context("Failed to parse auth token response")
}

/// Fetch the profile row for `user_id` with a fresh access token.
async fn fetch_profile(
    http: &reqwest::Client,
    config: &Config,
    access_token: &str,
    user_id: &str,
) -> Result<Option<Profile>> {
    let url = format!(
        "{}/rest/v1/profiles?id=eq.{}&select=id,username,display_name,avatar_url",
        config.backend_url.trim_end_matches('/'),
        user_id
    );
    tracing::debug!("REST GET {}", url);

    let resp = http
        .get(&url)
        .header("apikey", &config.api_key)
        .bearer_auth(access_token)
        .send()
        .await
        .with_context(|| format!("REST GET {} failed", url))?;

    let rows: Vec<Profile> = check_response(resp, &url)
        .await?
        .json()
        .await
        .context("Failed to parse profile response")?;
    Ok(rows.into_iter().next())
}

/// Turn a token response into a session, keeping the previous profile
/// snapshot if the profile lookup fails.
async fn build_session(
    http: &reqwest::Client,
    config: &Config,
    token: TokenResponse,
    previous: Option<&Session>,
) -> Result<Session> {
    let user_id = match (token.user, previous) {
        (Some(user), _) => user.id,
        (None, Some(prev)) => prev.user_id.clone(),
        (None, None) => bail!("Auth response missing 'user'"),
    };

    let profile = match fetch_profile(http, config, &token.access_token, &user_id).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Profile lookup failed, keeping cached profile: {:#}", e);
            previous.and_then(|s| s.profile.clone())
        }
    };

    Ok(Session {
        user_id,
        access_token: StoredToken::new(token.access_token, token.expires_in),
        refresh_token: token
            .refresh_token
            .or_else(|| previous.and_then(|s| s.refresh_token.clone())),
        profile,
    })
}

/// Refresh the stored session with its refresh token.
/// Returns Ok(true) if refresh succeeded, Ok(false) if there is nothing to refresh.
pub async fn refresh() -> Result<bool> {
    let mut config = Config::load()?;
    let previous = match config.session() {
        Some(s) => s.clone(),
        None => return Ok(false),
    };
    let refresh_token = match previous.refresh_token.clone() {
        Some(rt) => rt,
        None => return Ok(false),
    };

    tracing::info!("Refreshing session...");
    let http = reqwest::Client::new();
    let body = serde_json::json!({ "refresh_token": refresh_token });
    let token = token_request(&http, &config, "refresh_token", &body)
        .await
        .context("Failed to refresh session")?;

    let session = build_session(&http, &config, token, Some(&previous)).await?;
    config.set_session(session);
    config.save()?;
    Ok(true)
}

fn read_password() -> Result<String> {
    if let Ok(pw) = std::env::var(ENV_PASSWORD) {
        return Ok(pw);
    }
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Sign in with email and password, reusing or refreshing a stored session.
pub async fn login(email: &str, force: bool) -> Result<()> {
    {
        let config = Config::load()?;

        if !force {
            if let Some(session) = config.session() {
                if !session.access_token.is_expired() {
                    println!("Already logged in. Use --force to re-authenticate.");
                    return Ok(());
                }
                // Try refresh before asking for the password again
                if session.refresh_token.is_some() {
                    tracing::info!("Session expired, attempting refresh...");
                    match refresh().await {
                        Ok(true) => {
                            println!("Session refreshed successfully.");
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!("Refresh failed, falling back to password: {:#}", e);
                        }
                    }
                }
            }
        }
    }

    let mut config = Config::load()?;
    if config.api_key.is_empty() {
        bail!("No API key configured. Set api_key in the config file or MATCHCHAT_API_KEY.");
    }

    let password = read_password()?;
    if password.is_empty() {
        bail!("Empty password");
    }

    tracing::info!("Signing in as {}...", email);
    let http = reqwest::Client::new();
    let body = serde_json::json!({ "email": email, "password": password });
    let token = token_request(&http, &config, "password", &body)
        .await
        .context("Sign-in failed")?;

    let session = build_session(&http, &config, token, None).await?;
    let who = session.local_profile().label().to_string();
    config.set_session(session);
    config.save()?;

    println!("Logged in as {}.", who);
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_session();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status and chat settings
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("Backend:     {}", config.backend_url);
    println!(
        "API key:     {}",
        if config.api_key.is_empty() {
            "none"
        } else {
            "present"
        }
    );

    match config.session() {
        Some(session) => {
            let state = if session.access_token.is_expired() {
                "expired"
            } else {
                "valid"
            };
            println!("Session:     {}", state);
            println!("  user:      {}", session.local_profile().label());
            if let Some(exp) = session.access_token.expires_at {
                println!("  expires_at: {}", exp);
            }
            match session.refresh_token {
                Some(_) => println!("Refresh tok: present"),
                None => println!("Refresh tok: none"),
            }
        }
        None => println!("Session:     none"),
    }

    println!(
        "Delivery:    {}",
        if config.realtime_enabled {
            "push"
        } else {
            "polling"
        }
    );
    println!(
        "Sound:       {}",
        if config.sound_enabled { "on" } else { "off" }
    );

    if config.session().is_none() {
        println!("\nRun 'matchchat login --email <address>' to authenticate.");
    }

    Ok(())
}
