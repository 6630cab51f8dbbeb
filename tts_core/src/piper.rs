//! Piper-backed synthesis engine.
//!
//! Voices come from a JSON map file. Three entry shapes are accepted per
//! language key:
//!
//! ```json
//! {
//!   "de_DE": "models/de_DE/de_DE-mls-medium.onnx.json",
//!   "fr_FR": { "config": "models/fr_FR/fr_FR-siwis-medium.onnx.json", "default_speaker": 0 },
//!   "en_US": {
//!     "default_voice": "lessac",
//!     "voices": {
//!       "lessac": { "config": "models/en_US/en_US-lessac-medium.onnx.json", "gender": "female" }
//!     }
//!   }
//! }
//! ```
//!
//! A voice is selected either by its id (`lessac`) or by a language key
//! (`en_US`), which resolves to that language's default voice.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Arc, RwLock},
    time::Instant,
};

use anyhow::Context;
use dashmap::DashMap;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    engine::{EngineCapabilities, SynthesisEngine, VoiceDetail},
    error::EngineError,
    wav,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub config: String,
    pub language: String,
    pub speaker_id: Option<i64>,
    pub display_name: Option<String>,
    pub gender: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VoiceCatalog {
    voices: BTreeMap<String, VoiceEntry>,
    // language key -> default voice id
    language_defaults: BTreeMap<String, String>,
}

impl VoiceCatalog {
    pub fn from_json(json: &serde_json::Value) -> anyhow::Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voice map must be a JSON object"))?;

        let mut catalog = VoiceCatalog::default();
        for (lang, v) in obj {
            match v {
                serde_json::Value::Object(o) if o.contains_key("voices") => {
                    let default_voice = o
                        .get("default_voice")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'default_voice' for language {lang}"))?;
                    let voices_obj = o
                        .get("voices")
                        .and_then(|x| x.as_object())
                        .ok_or_else(|| anyhow::anyhow!("missing 'voices' object for language {lang}"))?;

                    for (voice_id, voice_data) in voices_obj {
                        let vo = voice_data
                            .as_object()
                            .ok_or_else(|| anyhow::anyhow!("voice {voice_id} must be an object"))?;
                        let config = vo
                            .get("config")
                            .and_then(|x| x.as_str())
                            .ok_or_else(|| anyhow::anyhow!("missing 'config' for voice {voice_id}"))?;
                        let text_field =
                            |name: &str| vo.get(name).and_then(|x| x.as_str()).map(str::to_string);

                        catalog.insert(
                            voice_id,
                            VoiceEntry {
                                config: config.to_string(),
                                language: lang.clone(),
                                speaker_id: vo.get("speaker_id").and_then(|x| x.as_i64()),
                                display_name: text_field("display_name"),
                                gender: text_field("gender"),
                                quality: text_field("quality"),
                            },
                        )?;
                    }

                    if !voices_obj.contains_key(default_voice) {
                        return Err(anyhow::anyhow!(
                            "default voice '{default_voice}' for language {lang} is not listed"
                        ));
                    }
                    catalog
                        .language_defaults
                        .insert(lang.clone(), default_voice.to_string());
                }
                serde_json::Value::Object(o) => {
                    let config = o
                        .get("config")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'config' for key {lang}"))?;
                    let entry = VoiceEntry {
                        config: config.to_string(),
                        language: lang.clone(),
                        speaker_id: o.get("default_speaker").and_then(|x| x.as_i64()),
                        display_name: None,
                        gender: None,
                        quality: None,
                    };
                    catalog.insert(lang, entry)?;
                    catalog.language_defaults.insert(lang.clone(), lang.clone());
                }
                serde_json::Value::String(path) => {
                    let entry = VoiceEntry {
                        config: path.clone(),
                        language: lang.clone(),
                        speaker_id: None,
                        display_name: None,
                        gender: None,
                        quality: None,
                    };
                    catalog.insert(lang, entry)?;
                    catalog.language_defaults.insert(lang.clone(), lang.clone());
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "invalid entry for key {lang} (expected string or object)"
                    ));
                }
            }
        }
        Ok(catalog)
    }

    fn insert(&mut self, voice_id: &str, entry: VoiceEntry) -> anyhow::Result<()> {
        if self.voices.contains_key(voice_id) {
            return Err(anyhow::anyhow!("duplicate voice id '{voice_id}' in voice map"));
        }
        self.voices.insert(voice_id.to_string(), entry);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Resolve a voice id or language key to a voice id.
    pub fn resolve_id<'a>(&'a self, voice: &'a str) -> Option<&'a str> {
        if self.voices.contains_key(voice) {
            return Some(voice);
        }
        self.language_defaults.get(voice).map(String::as_str)
    }

    pub fn get(&self, voice_id: &str) -> Option<&VoiceEntry> {
        self.voices.get(voice_id)
    }

    pub fn voice_ids(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    pub fn languages(&self) -> Vec<String> {
        self.language_defaults.keys().cloned().collect()
    }
}

// Loaded synthesizer and its sample rate
struct CachedSynth {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

pub struct PiperEngine {
    model: String,
    catalog: VoiceCatalog,
    default_voice: String,
    // config path -> loaded synthesizer
    synths: DashMap<String, CachedSynth>,
}

impl PiperEngine {
    /// Build from a catalog. `default_voice` may be a voice id or a language
    /// key; without one the first language's default voice is used.
    pub fn new(
        model: impl Into<String>,
        catalog: VoiceCatalog,
        default_voice: Option<&str>,
    ) -> anyhow::Result<Self> {
        if catalog.is_empty() {
            return Err(anyhow::anyhow!("voice map contains no voices"));
        }
        let default_voice = match default_voice {
            Some(v) => catalog
                .resolve_id(v)
                .ok_or_else(|| anyhow::anyhow!("default voice '{v}' is not in the voice map"))?
                .to_string(),
            None => catalog
                .language_defaults
                .values()
                .next()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("voice map contains no languages"))?,
        };

        Ok(Self {
            model: model.into(),
            catalog,
            default_voice,
            synths: DashMap::new(),
        })
    }

    /// Load the voice map from a JSON file (e.g. `models/map.json`).
    pub fn from_mapfile<P: AsRef<Path>>(
        model: impl Into<String>,
        path: P,
        default_voice: Option<&str>,
    ) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "voice map is not valid JSON")?;
        let catalog = VoiceCatalog::from_json(&json)?;
        Self::new(model, catalog, default_voice)
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    fn resolve_id<'a>(&'a self, voice: Option<&'a str>) -> Result<&'a str, EngineError> {
        let requested = voice.unwrap_or(self.default_voice.as_str());
        self.catalog
            .resolve_id(requested)
            .ok_or_else(|| EngineError::UnknownVoice {
                voice: requested.to_string(),
                available: self.catalog.voice_ids().join(", "),
            })
    }

    fn resolve(&self, voice: Option<&str>) -> Result<&VoiceEntry, EngineError> {
        let id = self.resolve_id(voice)?;
        self.catalog
            .get(id)
            .ok_or_else(|| EngineError::Synthesis(anyhow::anyhow!("voice '{id}' has no entry")))
    }

    /// Read sample rate from model config JSON
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", cfg_path.as_ref().display())
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }

    fn get_or_create_synth(
        &self,
        cfg_path: &str,
    ) -> anyhow::Result<(Arc<RwLock<PiperSpeechSynthesizer>>, u32)> {
        if let Some(cached) = self.synths.get(cfg_path) {
            return Ok((cached.synth.clone(), cached.sample_rate));
        }

        let started_at = Instant::now();
        let sample_rate = Self::read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = Arc::new(RwLock::new(PiperSpeechSynthesizer::new(model)?));

        // A concurrent loader may have won the race; keep whichever landed first.
        let cached = self
            .synths
            .entry(cfg_path.to_string())
            .or_insert(CachedSynth { synth, sample_rate });
        info!(
            op = "piper::load",
            config = cfg_path,
            sample_rate,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Piper voice loaded"
        );
        Ok((cached.synth.clone(), cached.sample_rate))
    }

    /// Load the synthesizers for the given voices ahead of the first request.
    pub fn preload(&self, voices: &[&str]) -> anyhow::Result<()> {
        for voice in voices {
            let entry = self.resolve(Some(*voice))?;
            self.get_or_create_synth(&entry.config)?;
        }
        Ok(())
    }
}

impl SynthesisEngine for PiperEngine {
    fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, EngineError> {
        let entry = self.resolve(voice)?;
        let (synth_arc, sample_rate) = self.get_or_create_synth(&entry.config)?;
        let synth = synth_arc
            .read()
            .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;

        // piper-rs exposes no public speaker selection, so the speaker id is
        // informational only.
        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(
                part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                    .into_vec(),
            );
        }

        Ok(wav::encode_wav(&samples, sample_rate)?)
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            model: self.model.clone(),
            voices: self.catalog.voice_ids(),
            languages: self.catalog.languages(),
        }
    }

    fn resolve_voice(&self, voice: Option<&str>) -> Result<Option<String>, EngineError> {
        self.resolve_id(voice).map(|id| Some(id.to_string()))
    }

    fn voice_details(&self) -> Vec<VoiceDetail> {
        self.catalog
            .voices
            .iter()
            .map(|(id, entry)| VoiceDetail {
                id: id.clone(),
                language: entry.language.clone(),
                display_name: entry.display_name.clone(),
                gender: entry.gender.clone(),
                quality: entry.quality.clone(),
                speaker_id: entry.speaker_id,
            })
            .collect()
    }
}
