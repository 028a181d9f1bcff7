use chrono::Duration;

use crate::errors::AppError;

/// Account lifecycle and notification settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub invite_ttl: Duration,
    pub default_locale: String,
    pub supported_locales: Vec<String>,
    pub notify_queue_capacity: usize,
    /// Requests per minute each client may make to the account endpoints.
    pub account_requests_per_minute: u32,
    /// Key throttling on `X-Forwarded-For` instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            invite_ttl: Duration::hours(24),
            default_locale: "ru".to_string(),
            supported_locales: vec!["en".to_string(), "ru".to_string()],
            notify_queue_capacity: 1024,
            account_requests_per_minute: 10,
            trust_forwarded_for: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let invite_ttl_hours = parse_var("INVITE_TTL_HOURS", 24i64)?;
        if invite_ttl_hours <= 0 {
            return Err(AppError::configuration("INVITE_TTL_HOURS must be positive"));
        }

        let supported_locales = match std::env::var("SUPPORTED_LOCALES") {
            Ok(raw) => parse_locales(&raw),
            Err(_) => defaults.supported_locales,
        };
        if supported_locales.is_empty() {
            return Err(AppError::configuration("SUPPORTED_LOCALES must list at least one locale"));
        }

        let default_locale = std::env::var("DEFAULT_LOCALE")
            .map(|value| value.trim().to_lowercase())
            .unwrap_or(defaults.default_locale);

        let notify_queue_capacity = parse_var("NOTIFY_QUEUE_CAPACITY", defaults.notify_queue_capacity)?;
        if notify_queue_capacity == 0 {
            return Err(AppError::configuration("NOTIFY_QUEUE_CAPACITY must be positive"));
        }

        let account_requests_per_minute =
            parse_var("ACCOUNT_REQUESTS_PER_MINUTE", defaults.account_requests_per_minute)?;
        if account_requests_per_minute == 0 {
            return Err(AppError::configuration("ACCOUNT_REQUESTS_PER_MINUTE must be positive"));
        }
        let trust_forwarded_for = parse_var("TRUST_FORWARDED_FOR", defaults.trust_forwarded_for)?;

        Ok(Self {
            invite_ttl: Duration::hours(invite_ttl_hours),
            default_locale,
            supported_locales,
            notify_queue_capacity,
            account_requests_per_minute,
            trust_forwarded_for,
        })
    }

    /// Picks the locale for an outgoing message: the requested one if supported,
    /// else the configured default if supported, else the first supported locale.
    pub fn select_locale(&self, requested: Option<&str>) -> String {
        let is_supported = |lang: &str| self.supported_locales.iter().any(|l| l == lang);

        if let Some(lang) = requested.map(|l| l.trim().to_lowercase()) {
            if is_supported(&lang) {
                return lang;
            }
        }

        if is_supported(&self.default_locale) {
            return self.default_locale.clone();
        }

        self.supported_locales
            .first()
            .cloned()
            .unwrap_or_else(|| "en".to_string())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{name} has an invalid value"))),
        Err(_) => Ok(default),
    }
}

fn parse_locales(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_locales_trims_and_lowercases() {
        assert_eq!(parse_locales(" EN, ru ,,"), vec!["en".to_string(), "ru".to_string()]);
    }

    #[test]
    fn select_locale_falls_back_to_default() {
        let settings = Settings::default();
        assert_eq!(settings.select_locale(Some("EN")), "en");
        assert_eq!(settings.select_locale(Some("de")), "ru");
        assert_eq!(settings.select_locale(None), "ru");
    }

    #[test]
    fn select_locale_uses_first_supported_when_default_is_unknown() {
        let settings = Settings {
            default_locale: "fr".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.select_locale(Some("de")), "en");
    }
}
