use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Wire decoding error: {0}")]
    WireDecode(String),
    #[error("Wire encoding error: {0}")]
    WireEncode(String),
    #[error("Unsupported wire format '{0}'")]
    UnsupportedFormat(String),
    #[error("Invalid configuration value for {0}: {1}")]
    BadConfigValue(String, String),
    #[error("Session owning thread could not be started: {0}")]
    Spawn(String),
    #[error("Session channel closed while sending {0}")]
    ChannelClosed(String),
    #[error("Invalid legacy value {0}: {1}")]
    BadLegacyValue(String, i64),
    #[error("Unknown legacy playback state '{0}'")]
    UnknownLegacyState(String),
}

impl SessionError {
    pub fn wire_decode(err: impl std::fmt::Display) -> Self {
        SessionError::WireDecode(err.to_string())
    }

    pub fn bad_config_value(key: &str, value: &str) -> Self {
        SessionError::BadConfigValue(key.to_string(), value.to_string())
    }

    pub fn channel_closed(what: &str) -> Self {
        SessionError::ChannelClosed(what.to_string())
    }

    pub fn bad_legacy_value(name: &str, value: i64) -> Self {
        SessionError::BadLegacyValue(name.to_string(), value)
    }
}
