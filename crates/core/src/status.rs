//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding lookup table of the `jobs` schema. The label is
//! the stable wire and log representation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant = $val ),+
        }

        impl $name {
            /// Every variant, in seed data order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database lookup ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Stable wire label.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Resolve a database lookup ID. Returns `None` for unknown ids.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $(x if x == $val => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            /// Case-insensitive parse of the wire label.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name),
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle status.
    JobStatus {
        Pending = 1 => "PENDING",
        Running = 2 => "RUNNING",
        Succeeded = 3 => "SUCCEEDED",
        Failed = 4 => "FAILED",
        Cancelled = 5 => "CANCELLED",
    }
}

define_status_enum! {
    /// Kind of work a job carries to the backend.
    JobType {
        Evaluation = 1 => "EVALUATION",
        Inference = 2 => "INFERENCE",
    }
}

define_status_enum! {
    /// Why a job ended in `FAILED`.
    FailureKind {
        /// The backend refused the work, or stayed unreachable through every retry.
        SubmissionError = 1 => "SUBMISSION_ERROR",
        /// Found `RUNNING` with no live backend record during recovery.
        LostJob = 2 => "LOST_JOB",
        /// The backend ran the work and reported a failure.
        ExecutionError = 3 => "EXECUTION_ERROR",
    }
}
