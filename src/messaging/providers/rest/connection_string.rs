//! Service Bus connection string parsing

use std::fmt;

use secrecy::SecretString;

use crate::messaging::{MessagingError, MessagingResult};

/// Parsed `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...` connection string
#[derive(Clone)]
pub struct ConnectionString {
    /// Fully qualified namespace host, e.g. `contoso.servicebus.windows.net`
    pub namespace_host: String,
    pub shared_access_key_name: String,
    pub shared_access_key: SecretString,
    /// Entity the connection string is scoped to, if any
    pub entity_path: Option<String>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("namespace_host", &self.namespace_host)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"[REDACTED]")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl ConnectionString {
    pub fn parse(raw: &str) -> MessagingResult<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in raw.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                MessagingError::invalid_connection_string(format!(
                    "segment '{}' is not a key=value pair",
                    redact_segment(part)
                ))
            })?;

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(value.trim().to_string()),
                "sharedaccesskey" => key = Some(value.trim().to_string()),
                "entitypath" => entity_path = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint
            .ok_or_else(|| MessagingError::invalid_connection_string("missing Endpoint"))?;
        let namespace_host = parse_endpoint_host(&endpoint)?;

        let shared_access_key_name = key_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MessagingError::invalid_connection_string("missing SharedAccessKeyName"))?;
        let shared_access_key = key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| MessagingError::invalid_connection_string("missing SharedAccessKey"))?;

        Ok(Self {
            namespace_host,
            shared_access_key_name,
            shared_access_key: SecretString::new(shared_access_key),
            entity_path: entity_path.filter(|path| !path.is_empty()),
        })
    }

    /// Namespace-level resource URI that SAS tokens are issued for
    pub fn resource_uri(&self) -> String {
        format!("https://{}/", self.namespace_host)
    }
}

fn parse_endpoint_host(endpoint: &str) -> MessagingResult<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        MessagingError::invalid_connection_string(format!("invalid Endpoint '{endpoint}': {e}"))
    })?;

    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            MessagingError::invalid_connection_string(format!("Endpoint '{endpoint}' has no host"))
        })
}

fn redact_segment(segment: &str) -> &str {
    if segment.to_ascii_lowercase().starts_with("sharedaccesskey") {
        "SharedAccessKey..."
    } else {
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_namespace_connection_string() {
        let parsed = ConnectionString::parse(
            "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=abc+def/ghi=",
        )
        .unwrap();

        assert_eq!(parsed.namespace_host, "contoso.servicebus.windows.net");
        assert_eq!(parsed.shared_access_key_name, "RootManageSharedAccessKey");
        assert_eq!(parsed.shared_access_key.expose_secret(), "abc+def/ghi=");
        assert_eq!(parsed.entity_path, None);
        assert_eq!(parsed.resource_uri(), "https://contoso.servicebus.windows.net/");
    }

    #[test]
    fn test_parse_is_case_insensitive_and_tolerates_trailing_semicolon() {
        let parsed = ConnectionString::parse(
            "endpoint=sb://contoso.servicebus.windows.net;sharedaccesskeyname=drain;sharedaccesskey=k;EntityPath=orders;",
        )
        .unwrap();

        assert_eq!(parsed.entity_path.as_deref(), Some("orders"));
    }

    #[test]
    fn test_missing_parts_rejected() {
        let err = ConnectionString::parse("SharedAccessKeyName=a;SharedAccessKey=b").unwrap_err();
        assert!(err.to_string().contains("missing Endpoint"));

        let err = ConnectionString::parse("Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=a")
            .unwrap_err();
        assert!(err.to_string().contains("missing SharedAccessKey"));

        let err = ConnectionString::parse("Endpoint=sb://contoso/;garbage").unwrap_err();
        assert!(matches!(err, MessagingError::InvalidConnectionString { .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let parsed = ConnectionString::parse(
            "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=drain;SharedAccessKey=topsecret",
        )
        .unwrap();

        assert!(!format!("{parsed:?}").contains("topsecret"));
    }
}
