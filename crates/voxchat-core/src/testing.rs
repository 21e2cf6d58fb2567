//! In-process fakes for the model seams.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::stream::StopScanner;
use crate::llm::{Completion, SamplingParams, TextGenerator};
use crate::tts::{LoadOptions, Speech, SpeechSynthesizer, SynthesisParams, VoiceBackend, VoiceModelFiles};

/// Replays a fixed reply word by word, honouring the stop sequence.
pub struct ScriptedGenerator {
    reply: String,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Arc<Self> {
        Self::slow(reply, Duration::ZERO)
    }

    /// Sleeps `delay` before every word.
    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Most completions that were ever running at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: &AtomicBool,
        on_text: &mut dyn FnMut(&str),
    ) -> Result<Completion> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);

        let mut scanner = StopScanner::new(params.stop.as_deref());
        let mut text = String::new();
        let mut completion_tokens = 0;
        for piece in self.reply.split_inclusive(' ') {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            completion_tokens += 1;
            let visible = scanner.push(piece);
            if !visible.is_empty() {
                on_text(&visible);
                text.push_str(&visible);
            }
            if scanner.is_stopped() {
                break;
            }
        }
        let tail = scanner.finish();
        if !tail.is_empty() {
            on_text(&tail);
            text.push_str(&tail);
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Completion {
            text,
            prompt_tokens: prompt.len(),
            completion_tokens,
            elapsed: Duration::from_millis(1),
        })
    }
}

/// Create a minimal voice model directory under `root`.
pub fn voice_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.safetensors", name)), b"weights").unwrap();
    fs::write(dir.join("config.json"), b"{}").unwrap();
    dir
}

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Healthy,
    Failing,
    /// The first synthesizer loaded dies on its first inference.
    DyingOnce,
}

/// Voice backend producing a short tone, or failing inference.
pub struct FakeVoiceBackend {
    loads: AtomicUsize,
    behaviour: Behaviour,
    delay: Duration,
}

impl FakeVoiceBackend {
    fn with(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            behaviour,
            delay,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::with(Behaviour::Healthy, Duration::ZERO)
    }

    pub fn failing() -> Arc<Self> {
        Self::with(Behaviour::Failing, Duration::ZERO)
    }

    /// Its first synthesizer crashes like a dead worker; reloads are healthy.
    pub fn dying_once() -> Arc<Self> {
        Self::with(Behaviour::DyingOnce, Duration::ZERO)
    }

    /// Every inference takes `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::with(Behaviour::Healthy, delay)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl VoiceBackend for FakeVoiceBackend {
    fn load(
        &self,
        _files: &VoiceModelFiles,
        options: &LoadOptions,
    ) -> Result<Box<dyn SpeechSynthesizer>> {
        let previous = self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSynthesizer {
            device: options.device.clone(),
            fail: self.behaviour == Behaviour::Failing,
            dies: self.behaviour == Behaviour::DyingOnce && previous == 0,
            alive: AtomicBool::new(true),
            delay: self.delay,
        }))
    }
}

struct FakeSynthesizer {
    device: String,
    fail: bool,
    dies: bool,
    alive: AtomicBool,
    delay: Duration,
}

impl SpeechSynthesizer for FakeSynthesizer {
    fn device(&self) -> &str {
        &self.device
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn infer(&self, text: &str, _params: &SynthesisParams) -> Result<Speech> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if !self.is_alive() {
            return Err(Error::Worker("TTS worker has shut down".to_string()));
        }
        if self.dies {
            self.alive.store(false, Ordering::SeqCst);
            return Err(Error::Worker("TTS worker closed its output".to_string()));
        }
        if self.fail {
            return Err(Error::Worker("synthesis exploded".to_string()));
        }
        let len = 441 * text.chars().count().max(1);
        let samples = (0..len)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin() * 0.3)
            .collect();
        Ok(Speech {
            samples,
            sample_rate: 44100,
        })
    }
}
