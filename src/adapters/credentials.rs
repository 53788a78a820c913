//! Integration credentials for the compute service.
//!
//! The integration file is parsed once into a tagged credential. Two file
//! shapes are understood:
//! - YAML integration files (`technicalAccount` block), always JWT mode
//! - developer-console project exports (JSON), which select OAuth
//!   server-to-server when such a credential is present and JWT otherwise
//!
//! Access tokens come from IMS: a signed JWT is exchanged at
//! `/ims/exchange/jwt`, OAuth uses the `client_credentials` grant at
//! `/ims/token/v3`.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::error::{DevToolError, Result};

/// IMS host used when the integration does not name one
pub const DEFAULT_IMS_ENDPOINT: &str = "https://ims-na1.adobelogin.com";

/// Metascope requested by JWT integrations that list none
const DEFAULT_METASCOPE: &str = "ent_adobeio_sdk";

/// Lifetime of the JWT presented to IMS
const JWT_LIFETIME_SECS: i64 = 300;

/// Service-account credential signed with a private key
#[derive(Debug, Clone)]
pub struct JwtCredential {
    pub client_id: String,
    pub client_secret: String,
    pub technical_account_id: String,
    pub org_id: String,
    pub meta_scopes: Vec<String>,
    pub ims_endpoint: String,
    pub private_key: String,
}

/// OAuth server-to-server credential
#[derive(Debug, Clone)]
pub struct OAuthCredential {
    pub client_id: String,
    pub client_secret: String,
    pub org_id: String,
    pub scopes: Vec<String>,
    pub ims_endpoint: String,
}

/// Credential used to authenticate against the compute service
#[derive(Debug, Clone)]
pub enum IntegrationCredential {
    Jwt(JwtCredential),
    OAuthServerToServer(OAuthCredential),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl IntegrationCredential {
    pub fn client_id(&self) -> &str {
        match self {
            Self::Jwt(jwt) => &jwt.client_id,
            Self::OAuthServerToServer(oauth) => &oauth.client_id,
        }
    }

    pub fn org_id(&self) -> &str {
        match self {
            Self::Jwt(jwt) => &jwt.org_id,
            Self::OAuthServerToServer(oauth) => &oauth.org_id,
        }
    }

    pub fn ims_endpoint(&self) -> &str {
        match self {
            Self::Jwt(jwt) => &jwt.ims_endpoint,
            Self::OAuthServerToServer(oauth) => &oauth.ims_endpoint,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Jwt(_) => "jwt",
            Self::OAuthServerToServer(_) => "oauth_server_to_server",
        }
    }

    /// Obtain an IMS access token
    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let (url, form): (String, Vec<(&str, String)>) = match self {
            Self::Jwt(jwt) => (
                format!("{}/ims/exchange/jwt", jwt.ims_endpoint),
                vec![
                    ("client_id", jwt.client_id.clone()),
                    ("client_secret", jwt.client_secret.clone()),
                    ("jwt_token", jwt.signed_token()?),
                ],
            ),
            Self::OAuthServerToServer(oauth) => {
                let mut form = vec![
                    ("grant_type", "client_credentials".to_string()),
                    ("client_id", oauth.client_id.clone()),
                    ("client_secret", oauth.client_secret.clone()),
                ];
                if !oauth.scopes.is_empty() {
                    form.push(("scope", oauth.scopes.join(",")));
                }
                (format!("{}/ims/token/v3", oauth.ims_endpoint), form)
            }
        };

        debug!(mode = self.mode(), "Requesting IMS access token");
        let response = client.post(&url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DevToolError::CredentialConfig(format!(
                "IMS token request failed with {}: {}",
                status, text
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

impl JwtCredential {
    /// Claims presented to the IMS JWT exchange
    pub fn claims(&self, issued_at: i64) -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("exp".into(), Value::from(issued_at + JWT_LIFETIME_SECS));
        claims.insert("iss".into(), Value::from(self.org_id.clone()));
        claims.insert("sub".into(), Value::from(self.technical_account_id.clone()));
        claims.insert(
            "aud".into(),
            Value::from(format!("{}/c/{}", self.ims_endpoint, self.client_id)),
        );
        for scope in &self.meta_scopes {
            let key = if scope.starts_with("https://") {
                scope.clone()
            } else {
                format!("{}/s/{}", self.ims_endpoint, scope)
            };
            claims.insert(key, Value::Bool(true));
        }
        claims
    }

    /// RS256-signed JWT for the exchange
    pub fn signed_token(&self) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|e| {
            DevToolError::CredentialConfig(format!("invalid private key: {}", e))
        })?;
        jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &self.claims(Utc::now().timestamp()),
            &key,
        )
        .map_err(|e| DevToolError::CredentialConfig(format!("failed to sign JWT: {}", e)))
    }
}

// YAML integration file

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YamlIntegration {
    technical_account: YamlTechnicalAccount,
    #[serde(default)]
    metascopes: Option<Value>,
    #[serde(default)]
    ims_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YamlTechnicalAccount {
    id: String,
    org: String,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    private_key_file: Option<String>,
}

// Developer-console project export

#[derive(Debug, Deserialize)]
struct ConsoleExport {
    project: ConsoleProject,
}

#[derive(Debug, Deserialize)]
struct ConsoleProject {
    org: ConsoleOrg,
    workspace: ConsoleWorkspace,
}

#[derive(Debug, Deserialize)]
struct ConsoleOrg {
    ims_org_id: String,
}

#[derive(Debug, Deserialize)]
struct ConsoleWorkspace {
    details: ConsoleDetails,
}

#[derive(Debug, Deserialize)]
struct ConsoleDetails {
    #[serde(default)]
    credentials: Vec<ConsoleCredential>,
}

#[derive(Debug, Deserialize)]
struct ConsoleCredential {
    #[serde(default)]
    jwt: Option<ConsoleJwt>,
    #[serde(default)]
    oauth_server_to_server: Option<ConsoleOAuth>,
}

#[derive(Debug, Deserialize)]
struct ConsoleJwt {
    client_id: String,
    client_secret: String,
    techacct_id: String,
    #[serde(default)]
    meta_scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConsoleOAuth {
    client_id: String,
    #[serde(default)]
    client_secrets: Vec<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Parse an integration document.
///
/// `private_key` is the key text read from an explicitly configured key file;
/// it wins over a key named inside a YAML document.
pub fn parse_integration(
    content: &str,
    private_key: Option<String>,
    base_dir: Option<&Path>,
) -> Result<IntegrationCredential> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        parse_console_export(trimmed, private_key)
    } else {
        parse_yaml_integration(content, private_key, base_dir)
    }
}

fn parse_console_export(content: &str, private_key: Option<String>) -> Result<IntegrationCredential> {
    let export: ConsoleExport = serde_json::from_str(content).map_err(|e| {
        DevToolError::CredentialConfig(format!("invalid console project file: {}", e))
    })?;
    let org_id = export.project.org.ims_org_id;
    let credentials = export.project.workspace.details.credentials;

    if let Some(oauth) = credentials
        .iter()
        .find_map(|c| c.oauth_server_to_server.as_ref())
    {
        let client_secret = oauth.client_secrets.first().cloned().ok_or_else(|| {
            DevToolError::CredentialConfig(
                "oauth_server_to_server credential has no client secret".to_string(),
            )
        })?;
        return Ok(IntegrationCredential::OAuthServerToServer(OAuthCredential {
            client_id: oauth.client_id.clone(),
            client_secret,
            org_id,
            scopes: oauth.scopes.clone(),
            ims_endpoint: DEFAULT_IMS_ENDPOINT.to_string(),
        }));
    }

    let jwt = credentials
        .iter()
        .find_map(|c| c.jwt.as_ref())
        .ok_or_else(|| {
            DevToolError::CredentialConfig(
                "console project file has neither a jwt nor an oauth_server_to_server credential"
                    .to_string(),
            )
        })?;
    let private_key = private_key.ok_or_else(|| {
        DevToolError::CredentialConfig(
            "JWT integration requires ASSET_COMPUTE_PRIVATE_KEY_FILE_PATH".to_string(),
        )
    })?;

    Ok(IntegrationCredential::Jwt(JwtCredential {
        client_id: jwt.client_id.clone(),
        client_secret: jwt.client_secret.clone(),
        technical_account_id: jwt.techacct_id.clone(),
        org_id,
        meta_scopes: non_empty_scopes(jwt.meta_scopes.clone()),
        ims_endpoint: DEFAULT_IMS_ENDPOINT.to_string(),
        private_key,
    }))
}

fn parse_yaml_integration(
    content: &str,
    private_key: Option<String>,
    base_dir: Option<&Path>,
) -> Result<IntegrationCredential> {
    let integration: YamlIntegration = serde_yaml::from_str(content).map_err(|e| {
        DevToolError::CredentialConfig(format!("invalid integration file: {}", e))
    })?;
    let account = integration.technical_account;

    let private_key = match (private_key, account.private_key, account.private_key_file) {
        (Some(key), _, _) => key,
        (None, Some(inline), _) => inline,
        (None, None, Some(file)) => {
            let path = match base_dir {
                Some(dir) => dir.join(&file),
                None => file.into(),
            };
            read_private_key(&path)?
        }
        (None, None, None) => {
            return Err(DevToolError::CredentialConfig(
                "JWT integration requires a private key (ASSET_COMPUTE_PRIVATE_KEY_FILE_PATH or technicalAccount.privateKeyFile)"
                    .to_string(),
            ))
        }
    };

    // metascopes may be a list or a comma-separated string
    let meta_scopes = match integration.metascopes {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(list)) => list.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    };

    Ok(IntegrationCredential::Jwt(JwtCredential {
        client_id: account.client_id,
        client_secret: account.client_secret,
        technical_account_id: account.id,
        org_id: account.org,
        meta_scopes: non_empty_scopes(meta_scopes),
        ims_endpoint: integration
            .ims_endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_IMS_ENDPOINT.to_string()),
        private_key,
    }))
}

fn non_empty_scopes(scopes: Vec<String>) -> Vec<String> {
    let scopes: Vec<String> = scopes.into_iter().filter(|s| !s.is_empty()).collect();
    if scopes.is_empty() {
        vec![DEFAULT_METASCOPE.to_string()]
    } else {
        scopes
    }
}

fn read_private_key(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        DevToolError::CredentialConfig(format!(
            "failed to read private key {}: {}",
            path.display(),
            e
        ))
    })
}

/// Resolve the integration credential from configuration
pub fn resolve_integration(config: &ResolvedConfig) -> Result<IntegrationCredential> {
    let path = config.integration_file_path().ok_or_else(|| {
        DevToolError::CredentialConfig(
            "ASSET_COMPUTE_INTEGRATION_FILE_PATH is not set and no console.json was found"
                .to_string(),
        )
    })?;
    let content = std::fs::read_to_string(&path).map_err(|e| {
        DevToolError::CredentialConfig(format!(
            "failed to read integration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let private_key = config
        .private_key_file
        .as_deref()
        .map(read_private_key)
        .transpose()?;

    let credential = parse_integration(&content, private_key, path.parent())?;
    debug!(mode = credential.mode(), file = %path.display(), "Resolved integration");
    Ok(credential)
}
