//! Shorthands for building and returning [`crate::error::EngineError`] values.

/// Creates an [`crate::error::EngineError`] from a kind, a static description and an optional
/// detail.
#[macro_export]
macro_rules! engine_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::EngineError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::EngineError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with an [`crate::error::EngineError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::engine_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::engine_error!($kind, $desc, $detail))
    };
}
