//! Registry credential checks
//!
//! Verifies a username/token pair before any push starts, so a bad token
//! fails fast instead of midway through the first layer upload.
//!
//! Docker Hub issues tokens from its own auth service. Other registries
//! announce their scheme in the `WWW-Authenticate` header of `GET /v2/`:
//!   Bearer realm="https://ghcr.io/token",service="ghcr.io"
//!   Basic realm="Registry Realm"

use super::DockerError;
use super::reference::ImageReference;
use crate::config::RegistryCredentials;
use reqwest::StatusCode;
use reqwest::header::WWW_AUTHENTICATE;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DOCKER_HUB_TOKEN_URL: &str = "https://auth.docker.io/token";
const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Authentication scheme announced by a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Bearer {
        realm: String,
        service: Option<String>,
    },
    Basic,
}

/// Parse a `WWW-Authenticate` header value
pub fn parse_www_authenticate(header: &str) -> Option<AuthChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(AuthChallenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_challenge_params(params);
    let realm = params.get("realm")?.clone();
    Some(AuthChallenge::Bearer {
        realm,
        service: params.get("service").cloned(),
    })
}

/// `key="value",key2="value, with comma"` into a map
fn parse_challenge_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((key, after_key)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_lowercase();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after_key.find(',') {
                Some(end) => (&after_key[..end], &after_key[end..]),
                None => (after_key, ""),
            }
        };

        params.insert(key, value.trim().to_string());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

/// Confirm that `credentials` may push to `reference`'s repository
pub async fn authenticate(
    reference: &ImageReference,
    credentials: &RegistryCredentials,
) -> Result<(), DockerError> {
    let client = reqwest::Client::builder()
        .timeout(REGISTRY_TIMEOUT)
        .build()
        .map_err(|e| DockerError::Registry(format!("Failed to create HTTP client: {e}")))?;

    let scope = format!("repository:{}:push,pull", reference.path());

    if reference.is_docker_hub() {
        debug!("Requesting Docker Hub token for {}", scope);
        return fetch_registry_token(
            &client,
            DOCKER_HUB_TOKEN_URL,
            Some(DOCKER_HUB_SERVICE),
            &scope,
            credentials,
        )
        .await
        .map(|_| ());
    }

    let base = format!("https://{}/v2/", reference.registry());
    debug!("Probing {}", base);
    let response = client
        .get(&base)
        .send()
        .await
        .map_err(|e| DockerError::Registry(format!("Failed to reach {base}: {e}")))?;

    if response.status().is_success() {
        debug!("Registry {} does not require authentication", reference.registry());
        return Ok(());
    }
    if response.status() != StatusCode::UNAUTHORIZED {
        return Err(DockerError::Registry(format!(
            "Unexpected response from {base}: HTTP {}",
            response.status()
        )));
    }

    let challenge = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_www_authenticate)
        .ok_or_else(|| {
            DockerError::Registry(format!("{base} sent no usable authentication challenge"))
        })?;

    match challenge {
        AuthChallenge::Bearer { realm, service } => {
            fetch_registry_token(&client, &realm, service.as_deref(), &scope, credentials)
                .await
                .map(|_| ())
        }
        AuthChallenge::Basic => {
            let response = client
                .get(&base)
                .basic_auth(&credentials.username, Some(&credentials.token))
                .send()
                .await
                .map_err(|e| DockerError::Registry(format!("Failed to reach {base}: {e}")))?;
            check_auth_status(response.status(), reference.registry())
        }
    }
}

fn check_auth_status(status: StatusCode, registry: &str) -> Result<(), DockerError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(DockerError::Registry(format!(
            "{registry} rejected the credentials (HTTP {status})"
        )))
    } else {
        Err(DockerError::Registry(format!(
            "{registry} authentication failed: HTTP {status}"
        )))
    }
}

fn token_url(realm: &str, service: Option<&str>, scope: &str) -> String {
    let separator = if realm.contains('?') { '&' } else { '?' };
    match service {
        Some(service) => format!("{realm}{separator}service={service}&scope={scope}"),
        None => format!("{realm}{separator}scope={scope}"),
    }
}

async fn fetch_registry_token(
    client: &reqwest::Client,
    realm: &str,
    service: Option<&str>,
    scope: &str,
    credentials: &RegistryCredentials,
) -> Result<String, DockerError> {
    let url = token_url(realm, service, scope);
    let response = client
        .get(&url)
        .basic_auth(&credentials.username, Some(&credentials.token))
        .send()
        .await
        .map_err(|e| DockerError::Registry(format!("Failed to fetch registry token: {e}")))?;

    check_auth_status(response.status(), realm)?;

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| DockerError::Registry(format!("Failed to decode registry token: {e}")))?;
    token_response
        .token
        .or(token_response.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| DockerError::Registry("Registry token missing".to_string()))
}
