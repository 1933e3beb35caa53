use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::options::Options;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Apns,
    Gcm,
    Dummy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    #[serde(rename = "type")]
    pub kind: GatewayKind,
    #[serde(flatten)]
    pub options: Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareKind {
    TimeFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareSettings {
    #[serde(rename = "type")]
    pub kind: MiddlewareKind,
    #[serde(flatten)]
    pub options: Options,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateways: Vec<GatewaySettings>,
    /// Applied to every delivery after the gateway's own middlewares.
    #[serde(default)]
    pub middlewares: Vec<MiddlewareSettings>,
    pub feedback: Option<Options>,
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("pling").required(false))
            .add_source(Environment::with_prefix("PLING").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("PLING").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// The `[feedback]` section, or the certificate of the first APNs
    /// gateway when there is none.
    pub fn feedback_options(&self) -> Option<Options> {
        if let Some(options) = &self.feedback {
            return Some(options.clone());
        }

        self.gateways
            .iter()
            .find(|gateway| gateway.kind == GatewayKind::Apns)
            .and_then(|gateway| gateway.options.get("certificate"))
            .map(|certificate| Options::new().with("certificate", certificate.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn load(toml: &str) -> Settings {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        Settings::load_from_path(file.path()).unwrap()
    }

    #[test]
    fn test_gateways_and_middlewares() {
        let settings = load(
            r#"
            [[gateways]]
            type = "apns"
            certificate = "/path/to/certificate.pem"
            payload = true

            [[gateways]]
            type = "dummy"

            [[middlewares]]
            type = "time_filter"
            from = 8
            to = 22
            "#,
        );

        assert_eq!(settings.gateways.len(), 2);
        assert_eq!(settings.gateways[0].kind, GatewayKind::Apns);
        assert_eq!(
            settings.gateways[0].options.str("certificate").unwrap(),
            Some("/path/to/certificate.pem".to_string())
        );
        assert!(settings.gateways[0].options.bool_or("payload", false).unwrap());
        assert_eq!(settings.gateways[1].kind, GatewayKind::Dummy);

        assert_eq!(settings.middlewares[0].kind, MiddlewareKind::TimeFilter);
        assert_eq!(settings.middlewares[0].options.u64_or("to", 0).unwrap(), 22);
    }

    #[test]
    fn test_feedback_falls_back_to_apns_certificate() {
        let settings = load(
            r#"
            [[gateways]]
            type = "apns"
            certificate = "/path/to/certificate.pem"
            "#,
        );

        let options = settings.feedback_options().unwrap();
        assert_eq!(options.get("certificate"), Some(&json!("/path/to/certificate.pem")));
        assert!(Settings::default().feedback_options().is_none());
    }

    #[test]
    fn test_explicit_feedback_section_wins() {
        let settings = load(
            r#"
            [feedback]
            certificate = "/path/to/feedback.pem"
            host = "feedback.sandbox.push.apple.com"
            "#,
        );

        let options = settings.feedback_options().unwrap();
        assert_eq!(
            options.str("host").unwrap(),
            Some("feedback.sandbox.push.apple.com".to_string())
        );
    }

    #[test]
    fn test_unknown_gateway_type_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(b"[[gateways]]\ntype = \"c2dm\"\n").unwrap();

        assert!(Settings::load_from_path(file.path()).is_err());
    }
}
