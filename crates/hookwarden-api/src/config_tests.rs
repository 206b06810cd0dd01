//! Tests for service configuration defaults and validation.

use super::*;

fn valid_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.providers.identity = ProviderConfig::with_secret("identity-secret");
    config.providers.billing = ProviderConfig::with_secret("billing-secret");
    config.providers.social = ProviderConfig::with_secret("social-secret");
    config
}

mod defaults_tests {
    use super::*;

    /// Server defaults match the documented values.
    #[test]
    fn test_server_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
        assert_eq!(server.shutdown_timeout_seconds, 30);
        assert!(server.enable_admin);
    }

    /// Each provider has its own default body cap.
    #[test]
    fn test_default_body_caps() {
        let provider = ProviderConfig::default();
        assert_eq!(
            provider.max_body_bytes_for(WebhookSource::Identity),
            1024 * 1024
        );
        assert_eq!(
            provider.max_body_bytes_for(WebhookSource::Billing),
            2 * 1024 * 1024
        );
        assert_eq!(
            provider.max_body_bytes_for(WebhookSource::Social),
            512 * 1024
        );

        let custom = ProviderConfig {
            max_body_bytes: Some(4096),
            ..ProviderConfig::default()
        };
        assert_eq!(custom.max_body_bytes_for(WebhookSource::Billing), 4096);
    }

    /// The router-wide limit is the largest provider cap.
    #[test]
    fn test_max_body_bytes_is_largest_cap() {
        let mut config = valid_config();
        assert_eq!(config.max_body_bytes(), DEFAULT_BILLING_BODY_BYTES);

        config.providers.social.max_body_bytes = Some(8 * 1024 * 1024);
        assert_eq!(config.max_body_bytes(), 8 * 1024 * 1024);
    }

    /// Ledger and sweeper defaults.
    #[test]
    fn test_ledger_and_sweeper_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(config.ledger.max_retries, 5);
        assert_eq!(config.ledger.retention(), Duration::from_secs(30 * 86_400));
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval(), Duration::from_secs(60));
        assert_eq!(config.retry.preset, RetryPreset::Default);
    }

    /// Breaker settings convert to the core config.
    #[test]
    fn test_circuit_breaker_settings_conversion() {
        let settings = CircuitBreakerSettings {
            failure_threshold: 3,
            recovery_timeout_ms: 1500,
            success_threshold: 2,
            operation_timeout_seconds: 5,
        };

        let config = settings.to_config();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::from_millis(1500));
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.operation_timeout, Duration::from_secs(5));
    }
}

mod deserialize_tests {
    use super::*;

    /// A partial document keeps defaults for everything it omits.
    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "server": { "port": 9000 },
                "providers": { "billing": { "secret": "whsec", "rate_limit": { "max_requests": 5 } } },
                "retry": { "preset": "aggressive" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.providers.billing.secret.as_ref().map(|s| s.expose()), Some("whsec"));
        assert_eq!(config.providers.billing.rate_limit.max_requests, 5);
        assert_eq!(config.providers.billing.rate_limit.window_ms, 60_000);
        assert_eq!(config.retry.preset, RetryPreset::Aggressive);
    }

    /// Unknown retry presets fail to load.
    #[test]
    fn test_unknown_retry_preset_rejected() {
        let result: Result<ServiceConfig, _> =
            serde_json::from_str(r#"{ "retry": { "preset": "reckless" } }"#);
        assert!(result.is_err());
    }

    /// Forwarding rules fill in optional fields.
    #[test]
    fn test_forwarding_rule_defaults() {
        let rule: ForwardingRule = serde_json::from_str(
            r#"{ "source": "billing", "url": "https://billing.internal/hooks" }"#,
        )
        .unwrap();

        assert_eq!(rule.source, WebhookSource::Billing);
        assert!(rule.event_types.is_empty());
        assert_eq!(rule.timeout_seconds, 10);
        assert_eq!(rule.dependency_name(), "billing.internal");

        let named = ForwardingRule {
            dependency: Some("billing-api".to_string()),
            ..rule
        };
        assert_eq!(named.dependency_name(), "billing-api");
    }

    /// Secrets never appear in serialized or debug output.
    #[test]
    fn test_secrets_redacted() {
        let mut provider = ProviderConfig::with_secret("super-secret-value");
        provider.previous_secret = Some(WebhookSecret::new("older-secret-value"));

        let debug = format!("{:?}", provider);
        assert!(debug.contains("<REDACTED>"));
        assert!(!debug.contains("super-secret-value"));
        assert!(!debug.contains("older-secret-value"));

        let json = serde_json::to_string(&provider).unwrap();
        assert!(!json.contains("super-secret-value"));
        assert!(!json.contains("secret\""));
    }

    /// Current secret comes first and blanks are skipped.
    #[test]
    fn test_secrets_order() {
        let mut provider = ProviderConfig::with_secret("current");
        assert_eq!(provider.secrets().len(), 1);

        provider.previous_secret = Some(WebhookSecret::new("previous"));
        assert_eq!(provider.secrets().len(), 2);

        provider.previous_secret = Some(WebhookSecret::new(""));
        assert_eq!(provider.secrets().len(), 1);
    }

    /// Loaded secrets are held as wiped-on-drop values, not plain strings.
    #[test]
    fn test_secrets_load_into_webhook_secret() {
        let provider: ProviderConfig = serde_json::from_str(
            r#"{ "secret": "whsec_current", "previous_secret": "whsec_old" }"#,
        )
        .unwrap();

        let current: &WebhookSecret = provider.secret.as_ref().unwrap();
        assert_eq!(current.expose(), "whsec_current");
        let secrets = provider.secrets();
        assert_eq!(
            secrets.iter().map(|s| s.expose()).collect::<Vec<_>>(),
            vec!["whsec_current", "whsec_old"]
        );
        assert!(!format!("{:?}", provider).contains("whsec_"));
    }
}

mod validation_tests {
    use super::*;

    /// A fully configured service validates.
    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    /// Enabled providers need a secret; disabled ones do not.
    #[test]
    fn test_missing_secret() {
        let mut config = valid_config();
        config.providers.social.secret = None;

        match config.validate() {
            Err(ConfigError::Missing { key }) => assert_eq!(key, "providers.social.secret"),
            other => panic!("expected missing secret, got {:?}", other),
        }

        config.providers.social.enabled = false;
        assert!(config.validate().is_ok());
    }

    /// Blank secrets and zero limits are provider errors.
    #[test]
    fn test_provider_errors() {
        let mut config = valid_config();
        config.providers.billing.secret = Some(WebhookSecret::new("   "));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Provider { ref provider, .. }) if provider == "billing"
        ));

        let mut config = valid_config();
        config.providers.identity.rate_limit.window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Provider { .. })
        ));

        let mut config = valid_config();
        config.providers.identity.max_body_bytes = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Provider { .. })
        ));
    }

    /// Service-level settings are range checked.
    #[test]
    fn test_invalid_service_settings() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.ledger.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.ledger.backend = LedgerBackend::Filesystem;
        config.ledger.path = PathBuf::new();
        assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));

        let mut config = valid_config();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sweeper.interval_seconds = 0;
        assert!(config.validate().is_err());
        config.sweeper.enabled = false;
        assert!(config.validate().is_ok());
    }

    /// Forwarding targets must be HTTP(S).
    #[test]
    fn test_forwarding_url_scheme() {
        let mut config = valid_config();
        config.forwarding.push(ForwardingRule {
            source: WebhookSource::Identity,
            event_types: vec![],
            url: "ftp://files.internal/drop".parse().unwrap(),
            dependency: None,
            timeout_seconds: 10,
        });

        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
