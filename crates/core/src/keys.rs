/// Suffix of the hash that holds the session's field/value pairs.
pub const DATA_SUFFIX: &str = "_Data";

/// Suffix of the string key holding the current lock owner.
pub const LOCK_SUFFIX: &str = "_Write_Lock";

/// Suffix of the hash holding session metadata (`SessionTimeout`).
pub const INTERNAL_SUFFIX: &str = "_Internal";

/// The three store keys that together make up one session record.
///
/// Keys have the form `{application_session}_Data`, `{application_session}_Write_Lock`
/// and `{application_session}_Internal`. The braces are a hash-tag hint so
/// stores that shard by key hash place all three on the same node.
///
/// Derivation is memoized: [`regenerate_if_changed`](Self::regenerate_if_changed)
/// only rebuilds the strings when the session id differs from the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    application_name: String,
    session_id: Option<String>,
    data_key: String,
    lock_key: String,
    internal_key: String,
}

impl SessionKeys {
    /// Create an empty generator bound to `application_name`.
    #[must_use]
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            session_id: None,
            data_key: String::new(),
            lock_key: String::new(),
            internal_key: String::new(),
        }
    }

    /// Build the keys for one session in a single step.
    #[must_use]
    pub fn for_session(application_name: impl Into<String>, session_id: &str) -> Self {
        let mut keys = Self::new(application_name);
        keys.regenerate_if_changed(session_id);
        keys
    }

    /// Point the generator at `session_id`. Returns `true` if the keys were
    /// rebuilt, `false` if the id was unchanged.
    pub fn regenerate_if_changed(&mut self, session_id: &str) -> bool {
        if self.session_id.as_deref() == Some(session_id) {
            return false;
        }
        let tag = format!("{{{}_{}}}", self.application_name, session_id);
        self.data_key = format!("{tag}{DATA_SUFFIX}");
        self.lock_key = format!("{tag}{LOCK_SUFFIX}");
        self.internal_key = format!("{tag}{INTERNAL_SUFFIX}");
        self.session_id = Some(session_id.to_owned());
        true
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// The session id the keys were last generated for.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn data_key(&self) -> &str {
        &self.data_key
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn internal_key(&self) -> &str {
        &self.internal_key
    }
}
