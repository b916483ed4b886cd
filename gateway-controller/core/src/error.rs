/// A categorized translation error.
///
/// Errors are collected alongside translated output and surface as condition
/// reasons on the status of the object that caused them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConfigError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDestination,
    RefNotPermitted,
    InvalidKind,
    BackendNotFound,
    InvalidFilter,
    InvalidCertificateRef,
    InvalidListenerRefNotPermitted,
    InvalidConfiguration,
    DeprecatedField,
    UnsupportedProtocol,
}

// === impl ConfigError ===

impl ConfigError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> &'static str {
        self.kind.reason()
    }
}

// === impl ErrorKind ===

impl ErrorKind {
    /// The condition reason reported for errors of this kind.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidDestination => "InvalidDestination",
            Self::RefNotPermitted => "RefNotPermitted",
            Self::InvalidKind => "InvalidKind",
            Self::BackendNotFound => "BackendNotFound",
            Self::InvalidFilter => "UnsupportedValue",
            Self::InvalidCertificateRef => "InvalidCertificateRef",
            Self::InvalidListenerRefNotPermitted => "RefNotPermitted",
            Self::InvalidConfiguration => "Invalid",
            Self::DeprecatedField => "DeprecatedField",
            Self::UnsupportedProtocol => "UnsupportedProtocol",
        }
    }

    /// Reference errors are reported on the ResolvedRefs condition rather than
    /// Accepted.
    pub fn is_ref_error(&self) -> bool {
        matches!(
            self,
            Self::RefNotPermitted
                | Self::InvalidKind
                | Self::BackendNotFound
                | Self::InvalidCertificateRef
                | Self::InvalidListenerRefNotPermitted
                | Self::InvalidDestination
        )
    }
}
