//! Session and identity management
//!
//! This module handles the identity the crawler presents to the target site:
//! - Drawing browser identities (user agent, language, referer)
//! - Per-session cookie jars
//! - Atomic rotation on block detection or after a request budget
//! - Seeding the first session with cookies before the crawl begins

mod identity;
mod rotator;

pub use identity::{Identity, IdentityPool, SessionState};
pub use rotator::{BlockWindow, SessionRotator};

use async_trait::async_trait;
use url::Url;

/// Prepares a session before crawling starts
///
/// Authentication and cookie acquisition are site specific; implementations
/// are invoked once, on the session active when the crawl starts.
#[async_trait]
pub trait SessionSeeder: Send + Sync {
    async fn seed(&self, session: &SessionState) -> crate::Result<()>;
}

/// Seeds a fixed list of `name=value` cookies for one site
#[derive(Debug, Clone)]
pub struct StaticCookieSeeder {
    cookies: Vec<String>,
    site: Url,
}

impl StaticCookieSeeder {
    pub fn new(cookies: Vec<String>, site: Url) -> Self {
        Self { cookies, site }
    }
}

#[async_trait]
impl SessionSeeder for StaticCookieSeeder {
    async fn seed(&self, session: &SessionState) -> crate::Result<()> {
        for cookie in &self.cookies {
            session.cookies.add_cookie_str(cookie, &self.site);
        }
        if !self.cookies.is_empty() {
            tracing::info!("Seeded {} cookies for {}", self.cookies.len(), self.site);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use reqwest::cookie::CookieStore;

    #[tokio::test]
    async fn test_static_cookie_seeder() {
        let rotator = SessionRotator::new(&IdentityConfig::default());
        let site = Url::parse("https://youcontrol.com.ua/").unwrap();
        let seeder = StaticCookieSeeder::new(vec!["session=xyz".to_string()], site.clone());

        seeder.seed(&rotator.current()).await.unwrap();

        let header = rotator.current().cookies.cookies(&site).unwrap();
        assert_eq!(header.to_str().unwrap(), "session=xyz");

        // Seeded cookies belong to the first session only
        let rotated = rotator.rotate();
        assert!(rotated.cookies.cookies(&site).is_none());
    }
}
