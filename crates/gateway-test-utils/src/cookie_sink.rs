//! Cookie sink that keeps what it is given.

use sso_gateway::services::sso_service::{CookieArtifact, CookieSink};

/// Records cookies written by `SsoIssuanceService::handle`.
#[derive(Debug, Default)]
pub struct RecordingCookieSink {
    cookies: Vec<CookieArtifact>,
}

impl RecordingCookieSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookies(&self) -> &[CookieArtifact] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// The only recorded cookie. Panics unless exactly one was written.
    pub fn single(&self) -> &CookieArtifact {
        assert_eq!(
            self.cookies.len(),
            1,
            "Expected exactly one cookie, got {}",
            self.cookies.len()
        );
        &self.cookies[0]
    }
}

impl CookieSink for RecordingCookieSink {
    fn add_cookie(&mut self, cookie: CookieArtifact) {
        self.cookies.push(cookie);
    }
}
