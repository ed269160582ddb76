use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Anonymous,
    Token,
}

/// Session identity obtained before any collection is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    uid: String,
    kind: IdentityKind,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            uid: format!("anon-{}", uuid::Uuid::new_v4().simple()),
            kind: IdentityKind::Anonymous,
        }
    }

    /// Accepts a pre-issued token as the session uid.
    pub fn from_token(token: &str) -> anyhow::Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("identity token is empty");
        }
        if token.chars().any(char::is_whitespace) {
            anyhow::bail!("identity token must not contain whitespace");
        }
        Ok(Self {
            uid: token.to_string(),
            kind: IdentityKind::Token,
        })
    }

    /// Uses the pre-issued token when there is one, else signs in anonymously.
    pub fn sign_in(initial_token: Option<&str>) -> anyhow::Result<Self> {
        let identity = match initial_token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Self::from_token(token)?,
            None => Self::anonymous(),
        };
        tracing::info!(uid = %identity.uid, kind = ?identity.kind, "signed in");
        Ok(identity)
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identities_are_distinct() {
        let a = Identity::anonymous();
        let b = Identity::anonymous();
        assert_ne!(a.uid(), b.uid());
        assert_eq!(a.kind(), IdentityKind::Anonymous);
    }

    #[test]
    fn sign_in_prefers_token() {
        let identity = Identity::sign_in(Some(" tok-42 ")).unwrap();
        assert_eq!(identity.uid(), "tok-42");
        assert_eq!(identity.kind(), IdentityKind::Token);

        let fallback = Identity::sign_in(Some("  ")).unwrap();
        assert_eq!(fallback.kind(), IdentityKind::Anonymous);
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(Identity::from_token("two words").is_err());
        assert!(Identity::from_token("").is_err());
    }
}
