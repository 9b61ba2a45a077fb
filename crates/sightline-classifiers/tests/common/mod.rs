//! Mock inference engine for testing
//!
//! Raw artifacts are text: `MODEL\n<name>|<id>|<label>:<score>,...`. Compiling
//! turns one into a bundle directory holding `model.txt`; loading parses it back.
//! Special prediction definitions: `fail` errors, `panic` panics, `slow` sleeps
//! before answering. A definition of `corrupt` fails to load.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, RgbImage};
use sightline_classifiers::{
    CompiledModel, InferenceEngine, LocalRecognizer, ModelMetadata, RawPrediction,
    RecognizerConfig,
};
use sightline_core::{ClassifiedImages, Error, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SLOW_MODEL_DELAY: Duration = Duration::from_millis(1000);

/// Counts every engine interaction
#[derive(Default)]
pub struct Counters {
    pub compiles: AtomicUsize,
    pub loads: AtomicUsize,
    pub predictions: AtomicUsize,
}

/// A configurable mock inference engine
#[derive(Default)]
pub struct MockEngine {
    pub counters: Arc<Counters>,
    fail_compile: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent compile fail
    pub fn fail_compiles(&self) {
        self.fail_compile.store(true, Ordering::SeqCst);
    }

    pub fn compiles(&self) -> usize {
        self.counters.compiles.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn predictions(&self) -> usize {
        self.counters.predictions.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for MockEngine {
    fn compile(&self, source: &Path, destination: &Path) -> Result<()> {
        self.counters.compiles.fetch_add(1, Ordering::SeqCst);

        if self.fail_compile.load(Ordering::SeqCst) {
            // Leave a partial bundle behind to prove it gets cleaned up
            std::fs::create_dir_all(destination)?;
            std::fs::write(destination.join("partial.bin"), b"half")?;
            return Err(Error::compile("simulated compiler crash"));
        }

        let raw = std::fs::read_to_string(source)?;
        let definition = raw
            .strip_prefix("MODEL\n")
            .ok_or_else(|| Error::compile("not a model artifact"))?;

        std::fs::create_dir_all(destination)?;
        std::fs::write(destination.join("model.txt"), definition)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Box<dyn CompiledModel>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);

        let definition = std::fs::read_to_string(path.join("model.txt"))?;
        if definition == "corrupt" {
            return Err(Error::internal("unsupported model format"));
        }

        let mut parts = definition.splitn(3, '|');
        let name = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        let predictions = parts.next().unwrap_or_default();

        Ok(Box::new(MockModel {
            metadata: ModelMetadata {
                display_name: (!name.is_empty()).then(|| name.to_string()),
                classifier_id: (!id.is_empty()).then(|| id.to_string()),
                version: None,
                input_size: Some((16, 16)),
            },
            predictions: predictions.to_string(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockModel {
    metadata: ModelMetadata,
    predictions: String,
    counters: Arc<Counters>,
}

impl CompiledModel for MockModel {
    fn metadata(&self) -> ModelMetadata {
        self.metadata.clone()
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<RawPrediction>> {
        self.counters.predictions.fetch_add(1, Ordering::SeqCst);
        assert_eq!(image.dimensions(), (16, 16));

        match self.predictions.as_str() {
            "fail" => Err(Error::internal("tensor shape mismatch")),
            "panic" => panic!("engine crashed"),
            "slow" => {
                std::thread::sleep(SLOW_MODEL_DELAY);
                Ok(vec![RawPrediction::new("late", 0.9)])
            }
            definition => Ok(parse_predictions(definition)),
        }
    }
}

fn parse_predictions(definition: &str) -> Vec<RawPrediction> {
    definition
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(label, score)| RawPrediction::new(label, score.parse::<f64>().unwrap()))
        .collect()
}

/// Raw artifact body as served by the remote endpoint
pub fn model_body(name: &str, id: &str, predictions: &str) -> String {
    format!("MODEL\n{}|{}|{}", name, id, predictions)
}

/// A small valid PNG
pub fn png() -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, image::Rgb([90, 120, 30])))
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Recognizer config rooted in a temp directory
pub fn config(root: &Path, service_url: &str) -> RecognizerConfig {
    let mut config = RecognizerConfig {
        models_dir: root.join("models"),
        scratch_dir: root.join("scratch"),
        service_url: service_url.to_string(),
        ..Default::default()
    };
    config.backup_exclusion.enabled = false;
    config
}

pub fn recognizer(root: &Path, engine: &Arc<MockEngine>) -> LocalRecognizer {
    recognizer_with(config(root, "http://127.0.0.1:1/api/v3"), engine)
}

pub fn recognizer_with(config: RecognizerConfig, engine: &Arc<MockEngine>) -> LocalRecognizer {
    let engine: Arc<dyn InferenceEngine> = engine.clone();
    LocalRecognizer::new(config, engine).unwrap()
}

/// Install a model without going through the network
pub fn install_local(
    recognizer: &LocalRecognizer,
    engine: &MockEngine,
    id: &str,
    name: &str,
    predictions: &str,
) -> PathBuf {
    let work = tempfile::tempdir().unwrap();
    let raw = work.path().join("raw.mlmodel");
    let bundle = work.path().join("bundle.mlmodelc");
    std::fs::write(&raw, model_body(name, id, predictions)).unwrap();
    engine.compile(&raw, &bundle).unwrap();
    recognizer.store().install(id, &bundle).unwrap()
}

/// Install a bundle whose definition fails to load
pub fn install_corrupt(recognizer: &LocalRecognizer, id: &str) {
    let work = tempfile::tempdir().unwrap();
    let bundle = work.path().join("bundle.mlmodelc");
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(bundle.join("model.txt"), "corrupt").unwrap();
    recognizer.store().install(id, &bundle).unwrap();
}

/// File names inside a directory; a missing directory is empty
pub fn entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Classifier ids in the order they appear in the envelope
pub fn returned_ids(response: &ClassifiedImages) -> Vec<String> {
    response
        .classifier_results()
        .map(|r| r.classifier_id.clone())
        .collect()
}
