use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;

use super::handler::{AllowList, ChatHandler, HandlerError, HandlerResult};
use super::types::ChatMessage;
use crate::config::SpeechConfig;

const SPEECH_TIMEOUT: Duration = Duration::from_secs(30);

pub const VOLUME_LOUD: f32 = 1.0;
pub const VOLUME_QUIET: f32 = 0.5;
pub const VOLUME_WHISPER: f32 = 0.2;

pub trait Speaker: Send + Sync {
    fn say(&self, text: &str, volume: f32) -> impl Future<Output = HandlerResult> + Send;
}

/// Logs what would be spoken. Used when no speech program is configured.
#[derive(Debug, Default)]
pub struct TracingSpeaker;

impl Speaker for TracingSpeaker {
    async fn say(&self, text: &str, volume: f32) -> HandlerResult {
        tracing::info!(volume, "Speaking: {}", text);
        Ok(())
    }
}

/// Hands each utterance to an external text-to-speech program.
///
/// `{volume}` in an argument is replaced by the current volume and `{text}` by
/// the utterance. Without a `{text}` placeholder the text is the last argument.
#[derive(Debug, Clone)]
pub struct ProcessSpeaker {
    program: String,
    args: Vec<String>,
}

impl ProcessSpeaker {
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn build_args(&self, text: &str, volume: f32) -> Vec<String> {
        let volume = format!("{:.1}", volume);
        let mut text_placed = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                text_placed |= arg.contains("{text}");
                arg.replace("{volume}", &volume).replace("{text}", text)
            })
            .collect();
        if !text_placed {
            args.push(text.to_string());
        }
        args
    }
}

impl Speaker for ProcessSpeaker {
    async fn say(&self, text: &str, volume: f32) -> HandlerResult {
        let mut child = Command::new(&self.program)
            .args(self.build_args(text, volume))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HandlerError::Speech(format!("failed to start {}: {}", self.program, e)))?;

        match tokio::time::timeout(SPEECH_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(HandlerError::Speech(format!(
                "{} exited with {}",
                self.program, status
            ))),
            Ok(Err(e)) => Err(HandlerError::Speech(e.to_string())),
            Err(_) => Err(HandlerError::Speech(format!(
                "{} did not finish within {:?}",
                self.program, SPEECH_TIMEOUT
            ))),
        }
    }
}

/// Either speaker, picked from configuration at startup.
#[derive(Debug)]
pub enum ConfiguredSpeaker {
    Process(ProcessSpeaker),
    Tracing(TracingSpeaker),
}

impl ConfiguredSpeaker {
    pub fn from_config(config: &SpeechConfig) -> Self {
        match ProcessSpeaker::from_command(&config.command) {
            Some(speaker) => Self::Process(speaker),
            None => Self::Tracing(TracingSpeaker),
        }
    }
}

impl Speaker for ConfiguredSpeaker {
    async fn say(&self, text: &str, volume: f32) -> HandlerResult {
        match self {
            Self::Process(speaker) => speaker.say(text, volume).await,
            Self::Tracing(speaker) => speaker.say(text, volume).await,
        }
    }
}

/// Bot variant that reads chat and follow notifications aloud.
///
/// Privileged nicks can toggle speech and change the volume with
/// `!speech`, `!silence`, `!loud`, `!quiet` and `!whisper`.
pub struct SpeechBot<S> {
    speaker: S,
    privileged: AllowList,
    enabled: AtomicBool,
    volume: Mutex<f32>,
}

impl<S: Speaker> SpeechBot<S> {
    pub fn new(speaker: S, privileged: AllowList) -> Self {
        Self {
            speaker,
            privileged,
            enabled: AtomicBool::new(true),
            volume: Mutex::new(VOLUME_LOUD),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = volume;
    }

    async fn say(&self, text: &str) -> HandlerResult {
        if !self.is_enabled() {
            return Ok(());
        }
        self.speaker.say(text, self.volume()).await
    }

    async fn handle_speech_command(&self, command: &str) -> HandlerResult {
        match command {
            "speech" => {
                self.enabled.store(true, Ordering::Release);
                self.say("enabling text to speech").await
            }
            "silence" => {
                let result = self.say("disabling text to speech").await;
                self.enabled.store(false, Ordering::Release);
                result
            }
            "loud" => {
                let result = self.say("setting volume to loud").await;
                self.set_volume(VOLUME_LOUD);
                result
            }
            "quiet" => {
                let result = self.say("setting volume to quiet").await;
                self.set_volume(VOLUME_QUIET);
                result
            }
            "whisper" => {
                let result = self.say("setting volume to whisper").await;
                self.set_volume(VOLUME_WHISPER);
                result
            }
            _ => Ok(()),
        }
    }
}

impl<S: Speaker> ChatHandler for SpeechBot<S> {
    async fn on_command(&self, nick: &str, command: &str) -> HandlerResult {
        if !self.privileged.contains(nick) {
            tracing::debug!(nick, command, "Ignoring command from unprivileged nick");
            return Ok(());
        }
        let command = command.split_whitespace().next().unwrap_or_default();
        self.handle_speech_command(command).await
    }

    async fn on_message(&self, message: &ChatMessage) -> HandlerResult {
        tracing::debug!("Received \"{}\" from {}", message.body, message.nick);
        self.say(&format!("{} said {}", message.nick, message.body))
            .await
    }

    async fn on_notification(&self, text: &str) -> HandlerResult {
        self.say(text).await
    }
}
