use crate::config::IdentityConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::sync::Arc;

const ACCEPT_VALUES: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml;q=0.8,image/webp,*/*;q=0.5",
];

/// The browser identity presented to the target site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub referer: Option<String>,
    /// Random tag distinguishing identities in logs
    pub fingerprint: String,
}

/// Pool of header values identities are drawn from
#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
    accept_languages: Vec<String>,
    referers: Vec<String>,
}

impl IdentityPool {
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            user_agents: config.user_agents.clone(),
            accept_languages: config.accept_languages.clone(),
            referers: config.referers.clone(),
        }
    }

    /// Draws a random identity whose user agent differs from `avoid`
    ///
    /// The user agent is only repeated when the pool holds a single one.
    pub fn draw(&self, avoid: Option<&str>) -> Identity {
        let mut rng = rand::thread_rng();

        let candidates: Vec<&String> = self
            .user_agents
            .iter()
            .filter(|ua| Some(ua.as_str()) != avoid)
            .collect();
        let user_agent = candidates
            .choose(&mut rng)
            .map(|ua| ua.to_string())
            .or_else(|| self.user_agents.first().cloned())
            .unwrap_or_default();

        let accept_language = self
            .accept_languages
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| "uk-UA,uk;q=0.9,en;q=0.8".to_string());

        let accept = ACCEPT_VALUES
            .choose(&mut rng)
            .map(|s| s.to_string())
            .unwrap_or_default();

        Identity {
            user_agent,
            accept,
            accept_language,
            referer: self.referers.choose(&mut rng).cloned(),
            fingerprint: format!("{:08x}", rng.gen::<u32>()),
        }
    }
}

/// One live session: an identity plus its own cookie jar
///
/// Sessions are never mutated after creation apart from cookies the server
/// sets. Rotation replaces the whole session, so cookies never leak from
/// one identity into the next.
#[derive(Debug)]
pub struct SessionState {
    pub identity: Identity,
    pub cookies: Arc<Jar>,
    pub generation: u64,
}

impl SessionState {
    pub fn new(identity: Identity, generation: u64) -> Self {
        Self {
            identity,
            cookies: Arc::new(Jar::default()),
            generation,
        }
    }

    /// Request headers for this identity
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, &self.identity.user_agent);
        insert_header(&mut headers, ACCEPT, &self.identity.accept);
        insert_header(&mut headers, ACCEPT_LANGUAGE, &self.identity.accept_language);
        if let Some(referer) = &self.identity.referer {
            insert_header(&mut headers, REFERER, referer);
        }
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers
    }
}

fn insert_header(headers: &mut HeaderMap, name: reqwest::header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!("Skipping invalid {} header value", name),
    }
}
