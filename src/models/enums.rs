use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde names follow the storage spelling so LLM JSON parses directly.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(ValidationStatus {
    Success => "success",
    Retry => "retry",
    Fallback => "fallback",
});

str_enum!(UrgencyLevel {
    Critical => "critical",
    Urgent => "urgent",
    Routine => "routine",
});

str_enum!(ClinicalSignificance {
    High => "high",
    Medium => "medium",
    Low => "low",
});

str_enum!(VisionMode {
    Local => "local",
    Remote => "remote",
    Mock => "mock",
});

str_enum!(DevicePreference {
    Auto => "auto",
    Cpu => "cpu",
    Gpu => "gpu",
    Accelerator => "accelerator",
});
