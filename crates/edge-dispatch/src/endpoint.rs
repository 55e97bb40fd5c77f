//! Edge Network endpoint URLs.

use crate::shared_state::{EdgeConfiguration, EdgeEnvironment};
use crate::DispatchResult;
use url::Url;

pub const DEFAULT_DOMAIN: &str = "edge.adobedc.net";
pub const INTEGRATION_DOMAIN: &str = "edge-int.adobedc.net";

const PROD_PATH: &str = "ee";
const PRE_PROD_PATH: &str = "ee-pre-prd";

/// Which Edge Network API a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRequestType {
    Interact,
    Consent,
}

impl EdgeRequestType {
    pub fn path(&self) -> &'static str {
        match self {
            EdgeRequestType::Interact => "/v1/interact",
            EdgeRequestType::Consent => "/v1/privacy/set-consent",
        }
    }
}

/// Build the full request URL, including `configId` and `requestId`.
///
/// `path_override` replaces the API path for interact requests only and is
/// ignored unless it passes [`is_valid_path_override`].
pub fn endpoint_url(
    request_type: EdgeRequestType,
    configuration: &EdgeConfiguration,
    location_hint: Option<&str>,
    path_override: Option<&str>,
    request_id: &str,
) -> DispatchResult<Url> {
    let (domain, base_path) = match configuration.environment {
        EdgeEnvironment::Prod => (custom_domain(configuration), PROD_PATH),
        EdgeEnvironment::PreProd => (custom_domain(configuration), PRE_PROD_PATH),
        EdgeEnvironment::Int => (INTEGRATION_DOMAIN, PROD_PATH),
    };

    let mut url = format!("https://{}/{}", domain, base_path);
    if let Some(hint) = location_hint.map(str::trim).filter(|h| !h.is_empty()) {
        url.push('/');
        url.push_str(hint);
    }

    let api_path = match (request_type, path_override) {
        (EdgeRequestType::Interact, Some(path)) if is_valid_path_override(path) => path,
        _ => request_type.path(),
    };
    url.push_str(api_path);

    Ok(Url::parse_with_params(
        &url,
        &[
            ("configId", configuration.config_id.as_str()),
            ("requestId", request_id),
        ],
    )?)
}

fn custom_domain(configuration: &EdgeConfiguration) -> &str {
    configuration
        .domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DOMAIN)
}

/// A path override is an absolute path of `[A-Za-z0-9._/-]` with no `//`
/// and no `..`.
pub fn is_valid_path_override(path: &str) -> bool {
    path.len() > 1
        && path.starts_with('/')
        && !path.contains("//")
        && !path.contains("..")
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(environment: EdgeEnvironment, domain: Option<&str>) -> EdgeConfiguration {
        EdgeConfiguration {
            config_id: "cfg-1".to_string(),
            environment,
            domain: domain.map(str::to_string),
            validation_token: None,
        }
    }

    #[test]
    fn test_prod_interact_url() {
        let url = endpoint_url(
            EdgeRequestType::Interact,
            &config(EdgeEnvironment::Prod, None),
            None,
            None,
            "req-1",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://edge.adobedc.net/ee/v1/interact?configId=cfg-1&requestId=req-1"
        );
    }

    #[test]
    fn test_location_hint_and_custom_domain() {
        let url = endpoint_url(
            EdgeRequestType::Consent,
            &config(EdgeEnvironment::PreProd, Some("edge.example.com")),
            Some("or2"),
            None,
            "req-2",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://edge.example.com/ee-pre-prd/or2/v1/privacy/set-consent?configId=cfg-1&requestId=req-2"
        );
    }

    #[test]
    fn test_integration_ignores_custom_domain() {
        let url = endpoint_url(
            EdgeRequestType::Interact,
            &config(EdgeEnvironment::Int, Some("edge.example.com")),
            None,
            None,
            "r",
        )
        .unwrap();
        assert_eq!(url.host_str(), Some(INTEGRATION_DOMAIN));
        assert_eq!(url.path(), "/ee/v1/interact");
    }

    #[test]
    fn test_path_override() {
        let prod = config(EdgeEnvironment::Prod, None);
        let url = endpoint_url(
            EdgeRequestType::Interact,
            &prod,
            None,
            Some("/va/v1/sessionstart"),
            "r",
        )
        .unwrap();
        assert_eq!(url.path(), "/ee/va/v1/sessionstart");

        let ignored = endpoint_url(
            EdgeRequestType::Interact,
            &prod,
            None,
            Some("https://evil.example.com/x"),
            "r",
        )
        .unwrap();
        assert_eq!(ignored.path(), "/ee/v1/interact");

        let consent = endpoint_url(
            EdgeRequestType::Consent,
            &prod,
            None,
            Some("/va/v1/sessionstart"),
            "r",
        )
        .unwrap();
        assert_eq!(consent.path(), "/ee/v1/privacy/set-consent");
    }

    #[test]
    fn test_path_override_validation() {
        assert!(is_valid_path_override("/va/v1/sessionstart"));
        assert!(!is_valid_path_override("custom/path"));
        assert!(!is_valid_path_override("/"));
        assert!(!is_valid_path_override(""));
        assert!(!is_valid_path_override("/a//b"));
        assert!(!is_valid_path_override("/../admin"));
        assert!(!is_valid_path_override("/path?x=1"));
    }
}
