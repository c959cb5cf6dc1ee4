//! Macro for implementing Display and FromStr for configuration enums
//!
//! Configuration values arrive as strings from environment variables and as
//! serde fields from files. This macro keeps both spellings in one place.
//!
//! # Example
//!
//! ```rust
//! use hibench_domain::impl_domain_enum_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Scope {
//!     Chart,
//!     Family,
//!     Host,
//! }
//!
//! impl_domain_enum_conversions!(Scope {
//!     Chart => "chart",
//!     Family => "family",
//!     Host => "host",
//! });
//! ```

/// Implements Display and FromStr traits for configuration enums
///
/// This macro generates:
/// - Display trait: converts enum variants to their lowercase names
/// - FromStr trait: parses case-insensitive strings; `-` and `_` are
///   interchangeable so `most-recent` and `most_recent` both parse
#[macro_export]
macro_rules! impl_domain_enum_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
