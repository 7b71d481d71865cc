//! Request and response message bags (§3 Request/Response).
//!
//! Both are flat, open parameter maps: typed accessors exist for the OAuth/OIDC parameters
//! the engine itself reads or writes, but a host or a custom handler may read and set any
//! other parameter by name, the same way a web framework's form/query map works. Absent and
//! empty-string are kept distinct throughout — a missing `code_verifier` is not the same as
//! one present and empty (§9 design note).
use std::collections::BTreeMap;

macro_rules! param_accessor {
    ($name:ident) => {
        pub fn $name(&self) -> Option<&str> {
            self.get(stringify!($name))
        }
    };
}

/// An incoming request's parameters, as decoded from a query string, form body, or JSON
/// object by the host before the engine sees it.
#[derive(Clone, Debug, Default)]
pub struct Request {
    params: BTreeMap<String, String>,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    param_accessor!(client_id);
    param_accessor!(client_secret);
    param_accessor!(response_type);
    param_accessor!(response_mode);
    param_accessor!(redirect_uri);
    param_accessor!(scope);
    param_accessor!(state);
    param_accessor!(grant_type);
    param_accessor!(code);
    param_accessor!(code_verifier);
    param_accessor!(code_challenge);
    param_accessor!(code_challenge_method);
    param_accessor!(refresh_token);
    param_accessor!(device_code);
    param_accessor!(user_code);
    param_accessor!(token);
    param_accessor!(token_type_hint);
    param_accessor!(username);
    param_accessor!(password);
    param_accessor!(nonce);
    param_accessor!(prompt);
    param_accessor!(id_token_hint);
    param_accessor!(post_logout_redirect_uri);
    /// The subject the host's own sign-in UI has already authenticated, out-of-band of
    /// this crate (§1 Non-goals: no sign-in UI is shipped here). The authorization and
    /// verification endpoints require this to be set before they can hand out a code or
    /// approve a device authorization.
    param_accessor!(authenticated_subject);
}

/// An outgoing response's parameters, assembled by handlers and rendered to the wire
/// format (query fragment, JSON body, `WWW-Authenticate` header) by the host.
#[derive(Clone, Debug, Default)]
pub struct Response {
    params: BTreeMap<String, String>,
    status: Option<u16>,
}

impl Response {
    pub fn new() -> Self {
        Response::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Populate `error`, `error_description`, `error_uri` from a rejection (§7).
    pub fn set_rejection(&mut self, rejection: &crate::error::Rejection) {
        for (name, value) in rejection.iter() {
            self.set(name, value.into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_empty_are_distinct() {
        let mut req = Request::new();
        assert_eq!(req.code_verifier(), None);
        req.set("code_verifier", "");
        assert_eq!(req.code_verifier(), Some(""));
    }

    #[test]
    fn rejection_populates_error_parameters() {
        let mut resp = Response::new();
        let rejection = crate::error::Rejection::new(crate::error::ProtocolErrorCode::InvalidGrant)
            .with_description("code already redeemed");
        resp.set_rejection(&rejection);
        assert_eq!(resp.get("error"), Some("invalid_grant"));
        assert_eq!(resp.get("error_description"), Some("code already redeemed"));
    }
}
