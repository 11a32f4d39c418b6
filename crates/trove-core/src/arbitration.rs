//! LLM arbitration port.
//!
//! The arbitration backend is optional and assumed unreliable: it may be
//! absent, slow, or return malformed verdicts. Callers never talk to an
//! [`ArbitrationPort`] directly; they go through [`Arbiter`], which
//! gates every call on a cached health probe, bounds it with a timeout,
//! retries once, and turns every failure into `None`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Verdict for a confused domain shortlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainVerdict {
    pub domain: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub justification: String,
}

/// Which columns of a structured sample carry the label and a file path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaVerdict {
    pub label_column: Option<String>,
    #[serde(default)]
    pub path_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelVerdict {
    pub label: String,
}

/// Domain/label guess for a search query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub domain: Option<String>,
    pub label: Option<String>,
}

#[async_trait]
pub trait ArbitrationPort: Send + Sync {
    /// Cheap liveness probe.
    async fn is_healthy(&self) -> bool;

    /// Pick one domain out of `shortlist` for the given text sample.
    async fn arbitrate_domain(&self, text: &str, shortlist: &[String]) -> Result<DomainVerdict>;

    /// Identify the label column of a structured record sample.
    async fn resolve_schema(&self, sample: &[(String, String)]) -> Result<SchemaVerdict>;

    /// Propose a clean label from OCR or text content.
    async fn refine_label(&self, ocr_text: &str, current_label: &str) -> Result<LabelVerdict>;

    /// Guess the domain (and possibly label) a query is about.
    async fn analyze_intent(&self, text: &str, domains: &[String]) -> Result<IntentVerdict> {
        let verdict = self.arbitrate_domain(text, domains).await?;
        Ok(IntentVerdict {
            domain: Some(verdict.domain),
            label: None,
        })
    }
}

/// Call settings for [`Arbiter`].
#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    /// Upper bound for a single call.
    pub timeout: Duration,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_pause: Duration,
    /// How long a health probe result is trusted.
    pub health_ttl: Duration,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 1,
            retry_pause: Duration::from_secs(2),
            health_ttl: Duration::from_secs(30),
        }
    }
}

/// Guarded access to an optional [`ArbitrationPort`].
#[derive(Clone)]
pub struct Arbiter {
    port: Option<Arc<dyn ArbitrationPort>>,
    settings: ArbiterSettings,
    health: Arc<Mutex<Option<(bool, Instant)>>>,
}

impl Arbiter {
    pub fn new(port: Arc<dyn ArbitrationPort>, settings: ArbiterSettings) -> Self {
        Self {
            port: Some(port),
            settings,
            health: Arc::new(Mutex::new(None)),
        }
    }

    /// An arbiter with no backend; every call yields `None`.
    pub fn disabled() -> Self {
        Self {
            port: None,
            settings: ArbiterSettings::default(),
            health: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.port.is_some()
    }

    /// Whether the backend is configured and answered its last health probe.
    pub async fn is_available(&self) -> bool {
        self.healthy_port().await.is_some()
    }

    async fn healthy_port(&self) -> Option<&dyn ArbitrationPort> {
        let port = self.port.as_deref()?;

        let cached = self
            .health
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .filter(|(_, at)| at.elapsed() < self.settings.health_ttl)
            .map(|(healthy, _)| healthy);

        let healthy = match cached {
            Some(h) => h,
            None => {
                let probe = tokio::time::timeout(self.settings.timeout, port.is_healthy()).await;
                let h = probe.unwrap_or(false);
                if !h {
                    tracing::debug!("arbitration backend unavailable");
                }
                if let Ok(mut guard) = self.health.lock() {
                    *guard = Some((h, Instant::now()));
                }
                h
            }
        };

        healthy.then_some(port)
    }

    async fn guarded<T, F, Fut>(&self, what: &str, op: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 0..=self.settings.retries {
            if attempt > 0 {
                tokio::time::sleep(self.settings.retry_pause).await;
            }
            match tokio::time::timeout(self.settings.timeout, op()).await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(e)) => {
                    tracing::warn!(operation = what, attempt = attempt + 1, error = %e, "arbitration call failed");
                }
                Err(_) => {
                    tracing::warn!(operation = what, attempt = attempt + 1, "arbitration call timed out");
                }
            }
        }
        None
    }

    pub async fn arbitrate_domain(&self, text: &str, shortlist: &[String]) -> Option<DomainVerdict> {
        let port = self.healthy_port().await?;
        self.guarded("arbitrate_domain", || port.arbitrate_domain(text, shortlist))
            .await
    }

    pub async fn resolve_schema(&self, sample: &[(String, String)]) -> Option<SchemaVerdict> {
        let port = self.healthy_port().await?;
        self.guarded("resolve_schema", || port.resolve_schema(sample))
            .await
    }

    pub async fn refine_label(&self, ocr_text: &str, current_label: &str) -> Option<LabelVerdict> {
        let port = self.healthy_port().await?;
        self.guarded("refine_label", || port.refine_label(ocr_text, current_label))
            .await
    }

    pub async fn analyze_intent(&self, text: &str, domains: &[String]) -> Option<IntentVerdict> {
        let port = self.healthy_port().await?;
        self.guarded("analyze_intent", || port.analyze_intent(text, domains))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        healthy: bool,
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ArbitrationPort for Flaky {
        async fn is_healthy(&self) -> bool {
            self.healthy
        }

        async fn arbitrate_domain(&self, _text: &str, shortlist: &[String]) -> Result<DomainVerdict> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("malformed verdict");
            }
            Ok(DomainVerdict {
                domain: shortlist[0].clone(),
                confidence: 0.9,
                justification: String::new(),
            })
        }

        async fn resolve_schema(&self, _sample: &[(String, String)]) -> Result<SchemaVerdict> {
            Ok(SchemaVerdict::default())
        }

        async fn refine_label(&self, _ocr: &str, _current: &str) -> Result<LabelVerdict> {
            anyhow::bail!("not supported")
        }
    }

    fn quick() -> ArbiterSettings {
        ArbiterSettings {
            timeout: Duration::from_secs(1),
            retries: 1,
            retry_pause: Duration::ZERO,
            health_ttl: Duration::from_secs(60),
        }
    }

    fn shortlist() -> Vec<String> {
        vec!["food".to_string(), "vehicles".to_string()]
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let port = Arc::new(Flaky {
            healthy: true,
            fail_first: 1,
            calls: AtomicU32::new(0),
        });
        let arbiter = Arbiter::new(port.clone(), quick());
        let verdict = arbiter.arbitrate_domain("ramen", &shortlist()).await.unwrap();
        assert_eq!(verdict.domain, "food");
        assert_eq!(port.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let port = Arc::new(Flaky {
            healthy: true,
            fail_first: 5,
            calls: AtomicU32::new(0),
        });
        let arbiter = Arbiter::new(port.clone(), quick());
        assert!(arbiter.arbitrate_domain("ramen", &shortlist()).await.is_none());
        assert_eq!(port.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_port_is_never_called() {
        let port = Arc::new(Flaky {
            healthy: false,
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let arbiter = Arbiter::new(port.clone(), quick());
        assert!(!arbiter.is_available().await);
        assert!(arbiter.arbitrate_domain("ramen", &shortlist()).await.is_none());
        assert_eq!(port.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_intent_uses_domain_arbitration() {
        let port = Arc::new(Flaky {
            healthy: true,
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let arbiter = Arbiter::new(port, quick());
        let intent = arbiter.analyze_intent("spicy noodles", &shortlist()).await.unwrap();
        assert_eq!(intent.domain.as_deref(), Some("food"));
        assert_eq!(intent.label, None);
    }

    #[tokio::test]
    async fn test_disabled_arbiter() {
        let arbiter = Arbiter::disabled();
        assert!(!arbiter.is_configured());
        assert!(arbiter.refine_label("text", "unknown").await.is_none());
    }
}
