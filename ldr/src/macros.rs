//! Macros for building and returning [`crate::error::LdrError`] values.

/// Creates an [`crate::error::LdrError`] from an error kind, a static description and an
/// optional dynamic detail.
#[macro_export]
macro_rules! ldr_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::LdrError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::LdrError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with an [`crate::error::LdrError`] built by [`ldr_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::ldr_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::ldr_error!($kind, $desc, $detail))
    };
}
