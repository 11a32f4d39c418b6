use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::*;
use crate::arbitration::{
    ArbiterSettings, ArbitrationPort, DomainVerdict, LabelVerdict, SchemaVerdict,
};
use crate::embedding::normalize;
use crate::models::{DocumentContent, DocumentKind, LabelMethod};
use crate::reference::DOMAIN_TEMPLATES;

const AXES: [&[&str]; 5] = [
    &["food", "sushi", "pizza", "ramen", "menu", "menus", "dish"],
    &["vehicle", "vehicles", "car", "cars", "truck", "engine"],
    &["plant", "plants", "fern", "tree"],
    &["music", "guitar", "song"],
    &["sports", "sport", "ball", "tennis"],
];
const DIMS: usize = 6;

/// Bag-of-topics embedder: one axis per topic plus a constant bias axis.
struct TopicEmbedder {
    calls: AtomicU32,
}

impl TopicEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            for (axis, words) in AXES.iter().enumerate() {
                if words.contains(&token) {
                    v[axis] += 1.0;
                }
            }
        }
        v[DIMS - 1] = 0.1;
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingPort for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
    async fn embed_images(&self, images: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        Ok(images.iter().map(|_| Self::vector("")).collect())
    }
}

#[derive(Default)]
struct CountingArbiter {
    healthy: bool,
    domain: Option<String>,
    schema_column: Option<String>,
    label: Option<String>,
    domain_calls: AtomicU32,
    schema_calls: AtomicU32,
    label_calls: AtomicU32,
}

#[async_trait]
impl ArbitrationPort for CountingArbiter {
    async fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn arbitrate_domain(&self, _text: &str, _shortlist: &[String]) -> Result<DomainVerdict> {
        self.domain_calls.fetch_add(1, Ordering::SeqCst);
        match &self.domain {
            Some(d) => Ok(DomainVerdict {
                domain: d.clone(),
                confidence: 0.8,
                justification: "looks right".into(),
            }),
            None => anyhow::bail!("no opinion"),
        }
    }

    async fn resolve_schema(&self, _sample: &[(String, String)]) -> Result<SchemaVerdict> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SchemaVerdict {
            label_column: self.schema_column.clone(),
            path_column: None,
        })
    }

    async fn refine_label(&self, _ocr: &str, _current: &str) -> Result<LabelVerdict> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        match &self.label {
            Some(l) => Ok(LabelVerdict { label: l.clone() }),
            None => anyhow::bail!("no label"),
        }
    }
}

fn settings() -> ArbiterSettings {
    ArbiterSettings {
        timeout: Duration::from_secs(1),
        retries: 1,
        retry_pause: Duration::ZERO,
        health_ttl: Duration::from_secs(60),
    }
}

fn root() -> &'static Path {
    Path::new("/data")
}

async fn references(domains: &[&str], vocabulary: &[&str]) -> References {
    let embedder = TopicEmbedder::new();
    let templates: Vec<String> = DOMAIN_TEMPLATES.iter().map(|t| t.to_string()).collect();
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let labels: Vec<String> = vocabulary.iter().map(|d| d.to_string()).collect();
    References {
        domains: ReferenceSet::from_templates(&embedder, &names, &templates)
            .await
            .unwrap(),
        labels: ReferenceSet::from_templates(&embedder, &labels, &templates)
            .await
            .unwrap(),
        vocabulary: LabelVocabulary::new(vocabulary),
    }
}

fn cascade_with(arbiter: Option<Arc<CountingArbiter>>) -> Cascade {
    let arbiter = match arbiter {
        Some(a) => Arbiter::new(a, settings()),
        None => Arbiter::disabled(),
    };
    Cascade::new(Arc::new(TopicEmbedder::new()), arbiter, CascadeConfig::default())
}

fn text_doc(path: &str, text: &str) -> Document {
    Document::new(path, DocumentKind::Text, DocumentContent::Text(text.to_string()))
}

fn image_doc(path: &str) -> Document {
    Document::new(
        path,
        DocumentKind::Image,
        DocumentContent::Image {
            path: PathBuf::from(path),
            ocr_text: String::new(),
        },
    )
}

fn record_doc(path: &str, fields: &[(&str, &str)]) -> Document {
    Document::new(
        path,
        DocumentKind::Csv,
        DocumentContent::Record(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
    )
}

fn bias_only() -> Vec<f32> {
    TopicEmbedder::vector("")
}

#[tokio::test]
async fn test_explicit_domain_is_trusted() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let mut cascade = cascade_with(None);
    let doc = text_doc("/data/misc/notes.txt", "anything").with_domain("Vehicles");
    let c = cascade.classify(&doc, &refs, root(), &bias_only()).await.unwrap();
    assert_eq!(c.domain, "vehicles");
    assert_eq!(c.confidence, 1.0);
    assert_eq!(c.method, DomainMethod::Explicit);
}

#[tokio::test]
async fn test_structural_forcing_skips_fusion_and_arbitration() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        domain: Some("vehicles".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));
    let doc = text_doc("/data/menus/sushi.txt", "truck engine");
    let payload = TopicEmbedder::vector("truck engine");

    let c = cascade.classify(&doc, &refs, root(), &payload).await.unwrap();

    assert_eq!(c.domain, "food");
    assert_eq!(c.method, DomainMethod::Structural);
    assert!(c.confidence > 0.5);
    assert_eq!(cascade.stats().fusion_evaluations, 0);
    assert_eq!(cascade.stats().arbitration_requests, 0);
    assert_eq!(arbiter.domain_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fusion_accepts_clear_winner() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        domain: Some("vehicles".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));
    let doc = text_doc("/data/misc/notes.txt", "pizza");
    let payload = TopicEmbedder::vector("pizza");

    let c = cascade.classify(&doc, &refs, root(), &payload).await.unwrap();

    assert_eq!(c.domain, "food");
    assert_eq!(c.method, DomainMethod::Fusion);
    assert!(c.confidence >= 0.25);
    assert_eq!(cascade.stats().fusion_evaluations, 1);
    assert_eq!(arbiter.domain_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_confused_shortlist_goes_to_arbitration() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        domain: Some("Vehicles".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));
    let doc = text_doc("/data/misc/notes.txt", "pizza truck");
    let payload = TopicEmbedder::vector("pizza truck");

    let c = cascade.classify(&doc, &refs, root(), &payload).await.unwrap();

    assert_eq!(c.domain, "vehicles");
    assert_eq!(c.method, DomainMethod::Arbitrated);
    assert_eq!(arbiter.domain_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_arbitration_verdict_is_ignored() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        domain: Some("astronomy".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter));
    let doc = text_doc("/data/misc/notes.txt", "pizza truck");
    let payload = TopicEmbedder::vector("pizza truck");

    let c = cascade.classify(&doc, &refs, root(), &payload).await.unwrap();

    assert_ne!(c.domain, "astronomy");
    assert_eq!(c.method, DomainMethod::Fusion);
}

#[tokio::test]
async fn test_unhealthy_arbiter_is_skipped() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: false,
        domain: Some("vehicles".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));
    let doc = text_doc("/data/misc/notes.txt", "pizza truck");
    let payload = TopicEmbedder::vector("pizza truck");

    cascade.classify(&doc, &refs, root(), &payload).await.unwrap();

    assert_eq!(arbiter.domain_calls.load(Ordering::SeqCst), 0);
    assert_eq!(cascade.stats().arbitration_requests, 0);
}

#[tokio::test]
async fn test_rejection_below_floor() {
    let refs = references(&["food", "vehicles", "plants", "music", "sports"], &[]).await;
    let mut cascade = cascade_with(None);
    let doc = text_doc("/data/misc/notes.txt", "lorem ipsum");

    let c = cascade.classify(&doc, &refs, root(), &bias_only()).await.unwrap();

    assert_eq!(c.domain, "unknown");
    assert_eq!(c.method, DomainMethod::Rejected);
    assert!(c.confidence < 0.25);
    assert_eq!(cascade.stats().rejected, 1);
}

#[tokio::test]
async fn test_programmer_errors() {
    let refs = references(&["food"], &[]).await;
    let mut cascade = cascade_with(None);
    let doc = text_doc("/data/misc/notes.txt", "pizza");

    let err = cascade.classify(&doc, &refs, root(), &[1.0, 0.0]).await.unwrap_err();
    assert!(matches!(err, CascadeError::VectorDimension { .. }));

    let err = cascade
        .classify(&doc, &References::default(), root(), &bias_only())
        .await
        .unwrap_err();
    assert!(matches!(err, CascadeError::NoDomains));
}

#[tokio::test]
async fn test_raw_label_from_folder() {
    let refs = references(&["food"], &[]).await;
    let mut cascade = cascade_with(None);

    let c = cascade
        .classify(&image_doc("/data/sushi/IMG_0042.jpg"), &refs, root(), &bias_only())
        .await
        .unwrap();
    assert_eq!(c.label, "sushi");
    assert_eq!(c.label_method, LabelMethod::Structural);

    let c = cascade
        .classify(&image_doc("/data/Golden_Retriever/train/001.jpg"), &refs, root(), &bias_only())
        .await
        .unwrap();
    assert_eq!(c.label, "golden retriever");
}

#[tokio::test]
async fn test_raw_label_falls_back_to_file_stem() {
    let refs = references(&["food"], &[]).await;
    let mut cascade = cascade_with(None);
    let c = cascade
        .classify(&image_doc("/data/batch_2023/fried_rice.jpg"), &refs, root(), &bias_only())
        .await
        .unwrap();
    assert_eq!(c.label, "fried rice");
    assert_eq!(c.label_method, LabelMethod::Structural);
}

#[tokio::test]
async fn test_raw_label_mapping_wins_over_folder() {
    let refs = references(&["food"], &[]).await;
    let mut cascade = cascade_with(None);
    cascade
        .cache_mut()
        .load_file_labels(vec![("IMG_0042.jpg".to_string(), "tuna roll".to_string())]);
    let c = cascade
        .classify(&image_doc("/data/sushi/IMG_0042.jpg"), &refs, root(), &bias_only())
        .await
        .unwrap();
    assert_eq!(c.label, "tuna roll");
    assert_eq!(c.label_method, LabelMethod::Mapping);
}

#[tokio::test]
async fn test_raw_label_keyword_then_semantic() {
    let refs = references(&["food"], &["pizza", "golden retriever"]).await;
    let mut cascade = cascade_with(None);

    let doc = text_doc("/data/2024/0001.txt", "We ordered a large pizza tonight");
    let c = cascade.classify(&doc, &refs, root(), &bias_only()).await.unwrap();
    assert_eq!(c.label, "pizza");
    assert_eq!(c.label_method, LabelMethod::Keyword);

    let doc = text_doc("/data/2024/0002.txt", "margherita with basil");
    let payload = TopicEmbedder::vector("pizza");
    let c = cascade.classify(&doc, &refs, root(), &payload).await.unwrap();
    assert_eq!(c.label, "pizza");
    assert_eq!(c.label_method, LabelMethod::Semantic);
}

#[tokio::test]
async fn test_raw_label_arbitration_and_rejection() {
    let refs = references(&["food"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        label: Some("Invoice".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));
    let doc = text_doc("/data/2024/0001.txt", "total due 42");
    let c = cascade.classify(&doc, &refs, root(), &bias_only()).await.unwrap();
    assert_eq!(c.label, "invoice");
    assert_eq!(c.label_method, LabelMethod::Arbitrated);

    let mut plain = cascade_with(None);
    let c = plain.classify(&doc, &refs, root(), &bias_only()).await.unwrap();
    assert_eq!(c.label, "unknown");
    assert_eq!(c.label_method, LabelMethod::Rejected);
}

#[tokio::test]
async fn test_structured_label_steps() {
    let refs = references(&["food"], &["ramen"]).await;
    let mut cascade = cascade_with(None);

    let c = cascade
        .classify(
            &record_doc("/data/menus/a.csv", &[("id", "7"), ("dish", "Ramen")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label, "ramen");
    assert_eq!(c.label_method, LabelMethod::Vocabulary);

    let c = cascade
        .classify(
            &record_doc("/data/menus/a.csv", &[("id", "8"), ("Product Name", "Udon Bowl")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label, "udon bowl");
    assert_eq!(c.label_method, LabelMethod::Schema);

    let c = cascade
        .classify(
            &record_doc("/data/menus/a.csv", &[("id", "9"), ("Product Name", "Soba")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label, "soba");
    assert_eq!(c.label_method, LabelMethod::Cached);
}

#[tokio::test]
async fn test_structured_label_arbitration_runs_once_per_directory() {
    let refs = references(&["food"], &[]).await;
    let arbiter = Arc::new(CountingArbiter {
        healthy: true,
        schema_column: Some("dish_code".into()),
        ..Default::default()
    });
    let mut cascade = cascade_with(Some(arbiter.clone()));

    let c = cascade
        .classify(
            &record_doc("/data/x/a.csv", &[("n", "1"), ("dish_code", "katsu curry")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label, "katsu curry");
    assert_eq!(c.label_method, LabelMethod::Arbitrated);

    let c = cascade
        .classify(
            &record_doc("/data/x/a.csv", &[("n", "2"), ("dish_code", "tempura")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label_method, LabelMethod::Cached);
    assert_eq!(arbiter.schema_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_structured_label_fallback() {
    let refs = references(&["food"], &[]).await;
    let mut cascade = cascade_with(None);
    let c = cascade
        .classify(
            &record_doc("/data/y/b.csv", &[("k1", "12"), ("k2", "blue cheese")]),
            &refs,
            root(),
            &bias_only(),
        )
        .await
        .unwrap();
    assert_eq!(c.label, "blue cheese");
    assert_eq!(c.label_method, LabelMethod::Fallback);
}

#[tokio::test]
async fn test_prefetch_batches_context_embeddings() {
    let refs = references(&["food", "vehicles"], &[]).await;
    let embedder = Arc::new(TopicEmbedder::new());
    let mut cascade = Cascade::new(embedder.clone(), Arbiter::disabled(), CascadeConfig::default());
    let docs = vec![
        text_doc("/data/menus/a.txt", "x"),
        text_doc("/data/menus/b.txt", "y"),
        text_doc("/data/menus/a.txt", "z"),
    ];
    cascade.prefetch_contexts(&docs, root()).await.unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    for doc in &docs {
        cascade.classify(doc, &refs, root(), &bias_only()).await.unwrap();
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_softmax_sums_to_one() {
    let p = softmax(&[0.1, 0.5, 0.2], 10.0);
    let sum: f32 = p.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    assert!(p[1] > p[0] && p[1] > p[2]);
    assert!(softmax(&[], 10.0).is_empty());
}

#[test]
fn test_context_string() {
    let doc = record_doc("/data/Menus/summer-2024.csv", &[("Dish_Name", "x")]);
    assert_eq!(
        Cascade::context_string(&doc, root()),
        "menus summer 2024 dish name"
    );
}
