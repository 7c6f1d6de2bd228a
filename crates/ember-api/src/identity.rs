//! Pluggable OAuth identity providers.
//!
//! Each configured provider implements the same contract: exchange an
//! authorization code the client obtained for a verified external identity.
//! Providers are plain data (endpoints + credentials) selected by name from
//! the registry, so adding one is configuration, not a new type hierarchy.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// A verified identity from an external provider. `subject` is the
/// provider-scoped stable id; `email`/`name` are best-effort profile hints.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct OAuthProvider {
    name: String,
    token_url: String,
    userinfo_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(rename = "sub", alias = "id")]
    subject: String,
    email: Option<String>,
    name: Option<String>,
}

impl OAuthProvider {
    pub fn google(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            name: "google".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::new(),
        }
    }

    pub fn facebook(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            name: "facebook".into(),
            token_url: "https://graph.facebook.com/v18.0/oauth/access_token".into(),
            userinfo_url: "https://graph.facebook.com/me?fields=id,name,email".into(),
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exchange an authorization code for the external identity behind it.
    pub async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity> {
        let token: TokenResponse = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .context("token endpoint unreachable")?
            .error_for_status()
            .context("code exchange rejected")?
            .json()
            .await
            .context("malformed token response")?;

        let info: UserInfo = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("userinfo endpoint unreachable")?
            .error_for_status()
            .context("userinfo rejected")?
            .json()
            .await
            .context("malformed userinfo response")?;

        Ok(ExternalIdentity {
            provider: self.name.clone(),
            subject: info.subject,
            email: info.email,
            name: info.name,
        })
    }
}

/// Providers selected by configuration; unknown names are rejected at the
/// handler.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, OAuthProvider>,
}

impl ProviderRegistry {
    pub fn insert(&mut self, provider: OAuthProvider) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&OAuthProvider> {
        self.providers.get(name)
    }

    /// Build from environment: a provider is enabled when its client id and
    /// secret are both set.
    pub fn from_env(redirect_uri: &str) -> Self {
        let mut registry = Self::default();

        if let (Ok(id), Ok(secret)) = (
            std::env::var("EMBER_GOOGLE_CLIENT_ID"),
            std::env::var("EMBER_GOOGLE_CLIENT_SECRET"),
        ) {
            registry.insert(OAuthProvider::google(id, secret, redirect_uri.to_string()));
            info!("OAuth provider enabled: google");
        }

        if let (Ok(id), Ok(secret)) = (
            std::env::var("EMBER_FACEBOOK_CLIENT_ID"),
            std::env::var("EMBER_FACEBOOK_CLIENT_SECRET"),
        ) {
            registry.insert(OAuthProvider::facebook(id, secret, redirect_uri.to_string()));
            info!("OAuth provider enabled: facebook");
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_selects_by_name() {
        let mut registry = ProviderRegistry::default();
        registry.insert(OAuthProvider::google(
            "cid".into(),
            "secret".into(),
            "https://app.example/cb".into(),
        ));

        assert!(registry.get("google").is_some());
        assert!(registry.get("facebook").is_none());
        assert_eq!(registry.get("google").unwrap().name(), "google");
    }
}
