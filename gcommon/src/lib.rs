//! Shared utilities and strongly-typed common values for workspace crates.
//!
//! ```rust
//! use gcommon::{HeaderMap, MetadataMap, Principal, PrincipalId};
//!
//! let principal = Principal::new("user-1");
//! let mut headers = HeaderMap::new();
//! headers.insert("X-Principal-Id".to_string(), principal.id.to_string());
//! let metadata = MetadataMap::new();
//!
//! assert_eq!(principal.id, PrincipalId::from("user-1"));
//! assert_eq!(headers.len(), 1);
//! assert!(metadata.is_empty());
//! ```

pub mod future {
    //! Shared async future aliases.
    //!
    //! ```rust
    //! use gcommon::BoxFuture;
    //!
    //! fn str_len<'a>(value: &'a str) -> BoxFuture<'a, usize> {
    //!     Box::pin(async move { value.len() })
    //! }
    //!
    //! let _future = str_len("hello");
    //! ```

    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

pub mod context {
    //! Shared metadata maps and the authenticated principal.
    //!
    //! ```rust
    //! use gcommon::{AuthMethod, Principal};
    //!
    //! let principal = Principal::new("user-42")
    //!     .with_auth_method(AuthMethod::ApiKey)
    //!     .with_scopes(["chat", "models"]);
    //!
    //! assert_eq!(principal.id.as_str(), "user-42");
    //! assert_eq!(principal.auth_method.as_str(), "api_key");
    //! assert_eq!(principal.scopes.len(), 2);
    //! ```

    use std::collections::{BTreeMap, HashMap};
    use std::fmt::{Display, Formatter};

    pub type MetadataMap = HashMap<String, String>;

    /// Header names to first header value, ordered for stable iteration.
    pub type HeaderMap = BTreeMap<String, String>;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
    pub struct PrincipalId(String);

    impl PrincipalId {
        pub fn new(value: impl Into<String>) -> Self {
            Self(value.into())
        }

        pub fn as_str(&self) -> &str {
            self.0.as_str()
        }
    }

    impl Display for PrincipalId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl From<String> for PrincipalId {
        fn from(value: String) -> Self {
            Self(value)
        }
    }

    impl From<&str> for PrincipalId {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum AuthMethod {
        #[default]
        Jwt,
        ApiKey,
        Guest,
    }

    impl AuthMethod {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Jwt => "jwt",
                Self::ApiKey => "api_key",
                Self::Guest => "guest",
            }
        }
    }

    /// The authenticated actor issuing a request.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Principal {
        pub id: PrincipalId,
        pub auth_method: AuthMethod,
        pub scopes: Vec<String>,
    }

    impl Principal {
        pub fn new(id: impl Into<PrincipalId>) -> Self {
            Self {
                id: id.into(),
                auth_method: AuthMethod::default(),
                scopes: Vec::new(),
            }
        }

        pub fn with_auth_method(mut self, auth_method: AuthMethod) -> Self {
            self.auth_method = auth_method;
            self
        }

        pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
            self.scopes = scopes.into_iter().map(Into::into).collect();
            self
        }

        /// Headers forwarded to upstream providers on behalf of this principal.
        pub fn forward_headers(&self) -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert("X-Principal-Id".to_string(), self.id.to_string());
            headers.insert(
                "X-Auth-Method".to_string(),
                self.auth_method.as_str().to_string(),
            );
            if !self.scopes.is_empty() {
                headers.insert("X-Scopes".to_string(), self.scopes.join(" "));
            }
            headers
        }
    }
}

pub mod ids {
    //! Collision-resistant public identifiers.
    //!
    //! ```rust
    //! use gcommon::{IdGenerator, SecureIdGenerator};
    //!
    //! let id = SecureIdGenerator.generate("conv", 16);
    //! assert!(id.starts_with("conv_"));
    //! assert_eq!(id.len(), "conv_".len() + 32);
    //! ```

    use rand::RngCore;
    use rand::rngs::OsRng;

    pub const CONVERSATION_ID_PREFIX: &str = "conv";
    pub const ITEM_ID_PREFIX: &str = "msg";
    pub const DEFAULT_ID_BYTES: usize = 16;

    pub trait IdGenerator: Send + Sync {
        fn generate(&self, prefix: &str, byte_len: usize) -> String;
    }

    /// Hex-encoded OS randomness, `{prefix}_{hex}`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SecureIdGenerator;

    impl IdGenerator for SecureIdGenerator {
        fn generate(&self, prefix: &str, byte_len: usize) -> String {
            let mut bytes = vec![0_u8; byte_len.max(1)];
            OsRng.fill_bytes(&mut bytes);
            let encoded = hex::encode(bytes);
            if prefix.is_empty() {
                encoded
            } else {
                format!("{prefix}_{encoded}")
            }
        }
    }
}

pub mod registry {
    //! Generic registry map wrapper used by runtime registries.
    //!
    //! ```rust
    //! use gcommon::Registry;
    //!
    //! let mut registry = Registry::new();
    //! registry.insert("alpha".to_string(), 1_u32);
    //!
    //! assert_eq!(registry.get("alpha"), Some(&1));
    //! assert!(registry.contains_key("alpha"));
    //! ```

    use std::borrow::Borrow;
    use std::collections::HashMap;
    use std::hash::Hash;

    #[derive(Debug, Clone)]
    pub struct Registry<K, V> {
        items: HashMap<K, V>,
    }

    impl<K, V> Default for Registry<K, V>
    where
        K: Eq + Hash,
    {
        fn default() -> Self {
            Self {
                items: HashMap::new(),
            }
        }
    }

    impl<K, V> Registry<K, V>
    where
        K: Eq + Hash,
    {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, key: K, value: V) -> Option<V> {
            self.items.insert(key, value)
        }

        pub fn get<Q>(&self, key: &Q) -> Option<&V>
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.get(key)
        }

        pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.remove(key)
        }

        pub fn contains_key<Q>(&self, key: &Q) -> bool
        where
            K: Borrow<Q>,
            Q: Eq + Hash + ?Sized,
        {
            self.items.contains_key(key)
        }

        pub fn values(&self) -> impl Iterator<Item = &V> {
            self.items.values()
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }
    }
}

pub use context::{AuthMethod, HeaderMap, MetadataMap, Principal, PrincipalId};
pub use future::BoxFuture;
pub use ids::{
    CONVERSATION_ID_PREFIX, DEFAULT_ID_BYTES, ITEM_ID_PREFIX, IdGenerator, SecureIdGenerator,
};
pub use registry::Registry;

#[cfg(test)]
mod tests {
    use super::{AuthMethod, IdGenerator, Principal, PrincipalId, Registry, SecureIdGenerator};

    #[test]
    fn principal_id_round_trips_strings() {
        let id = PrincipalId::new("user-1");

        assert_eq!(id.as_str(), "user-1");
        assert_eq!(id.to_string(), "user-1");
        assert_eq!(PrincipalId::from("user-1".to_string()), id);
    }

    #[test]
    fn forward_headers_skip_empty_scopes() {
        let principal = Principal::new("user-1").with_auth_method(AuthMethod::ApiKey);
        let headers = principal.forward_headers();

        assert_eq!(headers.get("X-Principal-Id").map(String::as_str), Some("user-1"));
        assert_eq!(headers.get("X-Auth-Method").map(String::as_str), Some("api_key"));
        assert!(!headers.contains_key("X-Scopes"));

        let scoped = principal.with_scopes(["chat", "admin"]);
        assert_eq!(
            scoped.forward_headers().get("X-Scopes").map(String::as_str),
            Some("chat admin")
        );
    }

    #[test]
    fn secure_ids_are_prefixed_and_distinct() {
        let generator = SecureIdGenerator;
        let first = generator.generate("conv", 16);
        let second = generator.generate("conv", 16);

        assert!(first.starts_with("conv_"));
        assert_eq!(first.len(), 5 + 32);
        assert_ne!(first, second);
        assert_eq!(generator.generate("", 4).len(), 8);
    }

    #[test]
    fn generic_registry_basic_lifecycle() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry.insert("alpha".to_string(), 1_u32);
        assert_eq!(registry.get("alpha"), Some(&1));
        assert!(registry.contains_key("alpha"));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("alpha");
        assert_eq!(removed, Some(1));
        assert!(registry.is_empty());
    }
}
