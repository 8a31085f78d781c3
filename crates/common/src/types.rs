use serde::{Deserialize, Serialize};

/// Declares a UUID-backed identifier newtype.
///
/// The invoking crate must depend on `uuid` and `serde`.
#[macro_export]
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            ::core::fmt::Debug,
            ::core::clone::Clone,
            ::core::marker::Copy,
            ::core::cmp::PartialEq,
            ::core::cmp::Eq,
            ::core::cmp::PartialOrd,
            ::core::cmp::Ord,
            ::core::hash::Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl ::core::default::Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl ::core::convert::From<::uuid::Uuid> for $name {
            fn from(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl ::core::convert::From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier generated once per checkout call.
    ///
    /// It is the single idempotency key of the pipeline: the payment gateway
    /// de-duplicates charges on it, it travels inside the queued message and
    /// the order store allows at most one order per value.
    CheckoutAttemptId
);

uuid_id!(
    /// Identifier of a durable order, distinct from the checkout attempt id.
    OrderId
);

/// Identifier of the user owning a cart.
///
/// Issued by the authentication service, so it is treated as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[allow(dead_code)]
    mod with_result_alias {
        type Result<T> = std::result::Result<T, String>;

        crate::uuid_id!(
            /// Declared where a one-parameter `Result` alias is in scope.
            AliasedId
        );
    }

    #[test]
    fn checkout_attempt_id_new_creates_unique_ids() {
        let id1 = CheckoutAttemptId::new();
        let id2 = CheckoutAttemptId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn order_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = OrderId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn checkout_attempt_id_parses_from_string() {
        let id = CheckoutAttemptId::new();
        let parsed: CheckoutAttemptId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<CheckoutAttemptId>().is_err());
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = OrderId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let user = UserId::new("user-42");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"user-42\"");
    }

    #[test]
    fn declared_ids_ignore_names_in_scope_at_the_call_site() {
        let id = with_result_alias::AliasedId::new();
        let parsed: with_result_alias::AliasedId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
