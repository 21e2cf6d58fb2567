//! Style-Bert-VITS2 bridge.
//!
//! The voice model lives in a child process that speaks length-prefixed
//! JSON over its stdin/stdout: a 4-byte big-endian length followed by a UTF-8
//! JSON body, in both directions.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LoadOptions, SpeechSynthesizer, Speech, SynthesisParams, VoiceBackend, VoiceModelFiles};
use crate::audio;
use crate::error::{Error, Result};

/// Largest frame accepted from the worker (about 10 minutes of 44.1 kHz audio)
const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Request sent to the worker
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    Load {
        model_path: &'a PathBuf,
        config_path: &'a PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        style_vec_path: Option<&'a PathBuf>,
        device: &'a str,
        bert_model: &'a str,
    },
    Infer {
        text: &'a str,
        #[serde(flatten)]
        params: &'a SynthesisParams,
    },
    Shutdown,
}

/// Response from the worker
#[derive(Debug, Default, Deserialize)]
struct WorkerResponse {
    status: Option<String>,
    device: Option<String>,
    audio_base64: Option<String>,
    sample_rate: Option<u32>,
    error: Option<String>,
}

fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let length = u32::try_from(body.len())
        .map_err(|_| Error::Worker(format!("request too large: {} bytes", body.len())))?;
    writer
        .write_all(&length.to_be_bytes())
        .and_then(|_| writer.write_all(body))
        .and_then(|_| writer.flush())
        .map_err(|e| Error::Worker(format!("Failed to write request: {}", e)))
}

fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut length_buf = [0u8; 4];
    reader
        .read_exact(&mut length_buf)
        .map_err(|e| Error::Worker(format!("Failed to read response length: {}", e)))?;

    let length = u32::from_be_bytes(length_buf) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(Error::Worker(format!(
            "response of {} bytes exceeds the {} byte limit",
            length, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::Worker(format!("Failed to read response body: {}", e)))?;
    Ok(body)
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl WorkerProcess {
    /// One request/response round trip. Errors here leave the stream unusable.
    fn exchange(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
        let body = serde_json::to_vec(request)?;
        write_frame(&mut self.stdin, &body)?;

        let body = read_frame(&mut self.stdout)?;
        let response: WorkerResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::Worker(format!(
                "Failed to parse response: {} - {}",
                e,
                String::from_utf8_lossy(&body)
            ))
        })?;
        Ok(response)
    }

    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
        let response = self.exchange(request)?;
        match response.error {
            Some(err) => Err(Error::Worker(err)),
            None => Ok(response),
        }
    }

    fn shutdown(mut self) {
        if let Err(e) = self.call(&WorkerRequest::Shutdown) {
            debug!("TTS worker shutdown request failed: {}", e);
        }

        let WorkerProcess {
            mut child,
            stdin,
            stdout,
        } = self;
        drop(stdin);
        drop(stdout);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("TTS worker exited with {}", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => break,
            }
        }

        warn!("TTS worker did not exit, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Spawns one worker process per loaded voice model.
#[derive(Debug, Clone)]
pub struct Sbv2WorkerBackend {
    command: Vec<String>,
}

impl Sbv2WorkerBackend {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn spawn(&self) -> Result<WorkerProcess> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Config("TTS worker command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::ModelLoad(format!("Failed to start TTS worker {}: {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok(WorkerProcess {
                child,
                stdin,
                stdout,
            }),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::Worker("TTS worker stdio is unavailable".to_string()))
            }
        }
    }
}

impl VoiceBackend for Sbv2WorkerBackend {
    fn load(
        &self,
        files: &VoiceModelFiles,
        options: &LoadOptions,
    ) -> Result<Box<dyn SpeechSynthesizer>> {
        let mut process = self.spawn()?;

        let request = WorkerRequest::Load {
            model_path: &files.model_path,
            config_path: &files.config_path,
            style_vec_path: files.style_vec_path.as_ref(),
            device: &options.device,
            bert_model: &options.bert_model,
        };

        let response = match process.call(&request) {
            Ok(response) => response,
            Err(err) => {
                process.shutdown();
                return Err(Error::ModelLoad(format!("TTS worker failed to load voice: {}", err)));
            }
        };

        if let Some(status) = response.status.as_deref() {
            debug!("TTS worker load status: {}", status);
        }
        let device = response.device.unwrap_or_else(|| options.device.clone());
        info!("TTS worker ready on device: {}", device);

        Ok(Box::new(Sbv2Worker {
            process: Mutex::new(Some(process)),
            device,
        }))
    }
}

/// A voice model resident in a worker process.
pub struct Sbv2Worker {
    process: Mutex<Option<WorkerProcess>>,
    device: String,
}

impl SpeechSynthesizer for Sbv2Worker {
    fn device(&self) -> &str {
        &self.device
    }

    fn is_alive(&self) -> bool {
        // A held lock means a request is in flight on a live process.
        match self.process.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        }
    }

    fn infer(&self, text: &str, params: &SynthesisParams) -> Result<Speech> {
        let response = {
            let mut guard = self
                .process
                .lock()
                .map_err(|_| Error::Worker("TTS worker lock poisoned".to_string()))?;
            let exchanged = match guard.as_mut() {
                Some(process) => process.exchange(&WorkerRequest::Infer { text, params }),
                None => return Err(Error::Worker("TTS worker has shut down".to_string())),
            };
            match exchanged {
                Ok(response) => response,
                Err(err) => {
                    warn!("TTS worker stopped responding: {}", err);
                    if let Some(process) = guard.take() {
                        process.shutdown();
                    }
                    return Err(err);
                }
            }
        };
        if let Some(err) = response.error {
            return Err(Error::Worker(err));
        }

        let encoded = response
            .audio_base64
            .ok_or_else(|| Error::Worker("no audio in response".to_string()))?;
        let wav = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Worker(format!("Failed to decode audio: {}", e)))?;
        let (samples, wav_rate) = audio::decode_wav(&wav)?;

        let sample_rate = match response.sample_rate {
            Some(rate) if rate != wav_rate => {
                warn!(
                    "TTS worker reported {} Hz but sent {} Hz audio",
                    rate, wav_rate
                );
                wav_rate
            }
            _ => wav_rate,
        };

        Ok(Speech {
            samples,
            sample_rate,
        })
    }
}

impl Drop for Sbv2Worker {
    fn drop(&mut self) {
        if let Some(process) = self.process.get_mut().ok().and_then(Option::take) {
            process.shutdown();
        }
    }
}
