use thiserror::Error;
use uuid::Uuid;

/// Surface error for the core API.
///
/// Validation failures carry a stable `kind()` string the transport layer
/// can return verbatim. Upstream failures on the write path mean the bid was
/// not recorded and the caller must retry.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication failed")]
    AuthFailed,

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("session has not started yet")]
    SessionNotStarted,

    #[error("session already ended")]
    SessionEnded,

    #[error("session is inactive")]
    SessionInactive,

    #[error("bid {price} is below the reserve price {reserve}")]
    PriceBelowReserve { price: f64, reserve: f64 },

    #[error("{store} call exceeded its deadline")]
    UpstreamTimeout { store: &'static str },

    #[error("hot store unavailable: {0}")]
    HotStoreUnavailable(String),

    #[error("durable store unavailable: {0}")]
    DurableStoreUnavailable(String),

    #[error("internal error [{correlation_id}]")]
    Internal {
        correlation_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Wraps an unexpected failure, logging the full chain under a
    /// correlation id. Only the id is surfaced to the caller.
    pub fn internal(source: anyhow::Error) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(
            correlation_id = %correlation_id,
            error = ?source,
            "internal error"
        );
        Self::Internal {
            correlation_id,
            source,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed => "auth_failed",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionNotStarted => "session_not_started",
            Self::SessionEnded => "session_ended",
            Self::SessionInactive => "session_inactive",
            Self::PriceBelowReserve { .. } => "price_below_reserve",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::HotStoreUnavailable(_) => "hot_store_unavailable",
            Self::DurableStoreUnavailable(_) => "durable_store_unavailable",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// True for errors the caller can fix by changing the request; false for
    /// upstream/internal failures worth retrying.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::HotStoreUnavailable(_)
                | Self::DurableStoreUnavailable(_)
                | Self::Internal { .. }
        )
    }
}

/// Maps a repository failure onto the surface taxonomy: deadline misses
/// become `upstream_timeout`, everything else `durable_store_unavailable`.
pub fn durable_err(e: anyhow::Error) -> AppError {
    if e.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        AppError::UpstreamTimeout {
            store: "durable_store",
        }
    } else {
        AppError::DurableStoreUnavailable(e.to_string())
    }
}
