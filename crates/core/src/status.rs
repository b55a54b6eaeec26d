//! Status enums persisted as lowercase TEXT columns.
//!
//! The shared queue stores statuses as plain strings (`'pending'`,
//! `'busy'`, ...) because other services read and write the same rows.
//! Each enum generated here round-trips through [`as_str`] and
//! [`std::str::FromStr`] so repositories never spell a literal twice.
//!
//! [`as_str`]: crate::job_lifecycle::JobStatus::as_str

macro_rules! define_text_status {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// The value stored in the database column.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok($name::$variant), )+
                    other => Err($crate::error::CoreError::UnknownValue {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}
