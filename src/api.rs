
pub mod error;
pub mod id;
pub mod metadata;
pub mod store;
pub mod trial;

/// Name of the record field holding the list of trials.
pub const TRIALS: &str = "trials";
/// Name of the record field refreshed on every row update.
pub const UPDATED_AT: &str = "updated_at";

// deserialize a string or an integer as String
mod str_or_int {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>
    {
        struct StrOrInt;

        impl<'de> Visitor<'de> for StrOrInt {
            type Value = String;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or an integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
                Ok(v.to_owned())
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
                Ok(format!("{}", v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
                Ok(format!("{}", v))
            }
        }

        deserializer.deserialize_any(StrOrInt)
    }
}
