use thiserror::Error;

pub type DvnetResult<T> = std::result::Result<T, DvnetError>;

/// Error kinds the core distinguishes, matching the failure domains the
/// Network Builder has to reason about when deciding whether to roll back.
#[derive(Error, Debug)]
pub enum DvnetError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("name collision: {message}")]
    Collision { message: String },

    #[error("netlink operation failed: {message}")]
    Netlink { message: String },

    #[error("container operation failed: {message}")]
    Container { message: String },

    #[error("namespace operation failed: {message}")]
    Namespace { message: String },

    #[error("iptables operation failed: {message}")]
    Iptables { message: String },

    #[error("sysctl operation failed: {message}")]
    Sysctl { message: String },

    #[error("filesystem operation failed: {message}")]
    Filesystem { message: String },

    #[error("unknown network: {network_id}")]
    UnknownNetwork { network_id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DvnetError {
    pub fn netlink(message: impl Into<String>) -> Self {
        Self::Netlink {
            message: message.into(),
        }
    }

    pub fn namespace(message: impl Into<String>) -> Self {
        Self::Namespace {
            message: message.into(),
        }
    }

    pub fn container(message: impl Into<String>) -> Self {
        Self::Container {
            message: message.into(),
        }
    }

    pub fn iptables(message: impl Into<String>) -> Self {
        Self::Iptables {
            message: message.into(),
        }
    }

    pub fn sysctl(message: impl Into<String>) -> Self {
        Self::Sysctl {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn collision(message: impl Into<String>) -> Self {
        Self::Collision {
            message: message.into(),
        }
    }
}

/// Adds call-site context to an error without losing the original.
pub trait Context<T> {
    fn context(self, message: &str) -> DvnetResult<T>;
}

impl<T> Context<T> for DvnetResult<T> {
    fn context(self, message: &str) -> DvnetResult<T> {
        self.map_err(|e| match e {
            DvnetError::Validation { message: inner } => DvnetError::Validation {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Collision { message: inner } => DvnetError::Collision {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Netlink { message: inner } => DvnetError::Netlink {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Container { message: inner } => DvnetError::Container {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Namespace { message: inner } => DvnetError::Namespace {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Iptables { message: inner } => DvnetError::Iptables {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Sysctl { message: inner } => DvnetError::Sysctl {
                message: format!("{message}: {inner}"),
            },
            DvnetError::Filesystem { message: inner } => DvnetError::Filesystem {
                message: format!("{message}: {inner}"),
            },
            other => other,
        })
    }
}
