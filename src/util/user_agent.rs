use rand::seq::SliceRandom;

const DESKTOP_USER_AGENTS: &[&str] = &[
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
  "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Supplies the User-Agent sent to upstream origins.
pub trait UserAgentSource: Send + Sync {
  fn user_agent(&self) -> String;
}

/// Picks a random desktop browser string for every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RotatingUserAgents;

impl UserAgentSource for RotatingUserAgents {
  fn user_agent(&self) -> String {
    DESKTOP_USER_AGENTS
      .choose(&mut rand::thread_rng())
      .copied()
      .unwrap_or(DESKTOP_USER_AGENTS[0])
      .to_string()
  }
}

/// Always sends the same string, for deterministic upstream requests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedUserAgent(pub String);

#[cfg(test)]
impl UserAgentSource for FixedUserAgent {
  fn user_agent(&self) -> String {
    self.0.clone()
  }
}
