//! Voice command dispatcher.
//!
//! Recognised (or typed) text is lowercased, trimmed and scanned against the
//! registered commands in registration order. A command matches when the
//! text contains any of its phrases; the first match wins, so an earlier
//! short phrase shadows a later longer one that contains it.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::{Controller, WriteOutcome};
use crate::i18n::{Language, Phrase};
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// What the dispatcher says once a handler finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply(pub String);

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply>> + Send>>;
pub type Handler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
pub struct VoiceCommand {
    pub primary: String,
    pub variants: Vec<String>,
    pub handler: Handler,
}

impl VoiceCommand {
    pub fn new<F, Fut>(primary: &str, variants: &[&str], handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        Self {
            primary: primary.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
            handler: Arc::new(move || Box::pin(handler()) as HandlerFuture),
        }
    }

    /// The primary phrase followed by the variants, in matching order.
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.variants.iter().map(String::as_str))
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

pub trait CommandMatcher: Send + Sync {
    /// `input` is already lowercased and trimmed.
    fn matches(&self, input: &str, phrase: &str) -> bool;
}

/// Plain substring containment, no word boundaries.
pub struct SubstringMatcher;

impl CommandMatcher for SubstringMatcher {
    fn matches(&self, input: &str, phrase: &str) -> bool {
        let phrase = phrase.trim().to_lowercase();
        !phrase.is_empty() && input.contains(&phrase)
    }
}

// ---------------------------------------------------------------------------
// Speech output
// ---------------------------------------------------------------------------

pub trait Speaker: Send + Sync {
    fn speak(&self, language: Language, text: &str);
}

/// Writes utterances to the log; the HTTP client does its own TTS.
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&self, language: Language, text: &str) {
        info!(locale = language.speech_locale(), "speak: {text}");
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSpeaker {
    spoken: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSpeaker {
    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl Speaker for RecordingSpeaker {
    fn speak(&self, _language: Language, text: &str) {
        if let Ok(mut s) = self.spoken.lock() {
            s.push(text.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    language: Language,
    commands: Vec<VoiceCommand>,
    matcher: Box<dyn CommandMatcher>,
    speaker: Arc<dyn Speaker>,
    shared: SharedState,
}

impl Dispatcher {
    pub fn new(language: Language, speaker: Arc<dyn Speaker>, shared: SharedState) -> Self {
        Self {
            language,
            commands: Vec::new(),
            matcher: Box::new(SubstringMatcher),
            speaker,
            shared,
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn CommandMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn register(&mut self, command: VoiceCommand) {
        debug!(primary = %command.primary, "voice command registered");
        self.commands.push(command);
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Swap the whole command list, e.g. after a language or profile change.
    pub fn replace_all(&mut self, language: Language, commands: Vec<VoiceCommand>) {
        self.language = language;
        self.clear();
        for c in commands {
            self.register(c);
        }
        info!(language = %language, commands = self.commands.len(), "voice commands registered");
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Run the first command whose phrases occur in `text` and speak its
    /// reply. Returns whether a command matched, regardless of its result.
    pub async fn process(&self, text: &str) -> bool {
        let input = text.trim().to_lowercase();
        let hit = self
            .commands
            .iter()
            .find(|c| c.phrases().any(|p| self.matcher.matches(&input, p)));

        let Some(command) = hit else {
            debug!(%input, "no voice command matched");
            self.shared
                .write()
                .await
                .record_voice(format!("'{input}' not understood"));
            self.speaker
                .speak(self.language, self.language.phrase(Phrase::NotUnderstood));
            return false;
        };

        let Reply(reply) = match (command.handler)().await {
            Ok(r) => r,
            Err(e) => {
                warn!(primary = %command.primary, "voice handler failed: {e:#}");
                Reply(self.language.phrase(Phrase::ErrorControlling).to_string())
            }
        };
        self.shared
            .write()
            .await
            .record_voice(format!("'{input}' -> {}: {reply}", command.primary));
        self.speaker.speak(self.language, &reply);
        true
    }
}

// ---------------------------------------------------------------------------
// Device phrase tables
// ---------------------------------------------------------------------------

struct PhraseRow {
    keywords: &'static [&'static str],
    device_id: &'static str,
    on: bool,
}

const fn row(keywords: &'static [&'static str], device_id: &'static str, on: bool) -> PhraseRow {
    PhraseRow {
        keywords,
        device_id,
        on,
    }
}

static VI_ROWS: &[PhraseRow] = &[
    row(&["bật máy cho ăn", "mở máy cho ăn", "máy cho ăn bật", "máy cho ăn mở", "cho ăn bật", "cho ăn mở", "bật cho ăn", "mở cho ăn", "chạy máy cho ăn", "rải thức ăn bật"], "autoFeeder", true),
    row(&["tắt máy cho ăn", "đóng máy cho ăn", "máy cho ăn tắt", "máy cho ăn đóng", "cho ăn tắt", "cho ăn đóng", "tắt cho ăn", "đóng cho ăn", "dừng cho ăn", "ngắt máy cho ăn"], "autoFeeder", false),
    row(&["bật máy siphong", "mở máy siphong", "máy siphong bật", "máy siphong mở", "chạy máy siphong", "siphong bật", "siphong mở", "bật siphong", "mở siphong", "chạy siphong", "bật xi phong", "mở xi phong", "chạy xi phong", "xi phong bật", "xi phong mở", "xi phong"], "siphonPump", true),
    row(&["tắt máy siphong", "đóng máy siphong", "máy siphong tắt", "máy siphong đóng", "dừng máy siphong", "siphong tắt", "siphong đóng", "tắt siphong", "đóng siphong", "dừng siphong", "ngắt siphong", "tắt xi phong", "đóng xi phong", "dừng xi phong", "xi phong tắt", "xi phong đóng"], "siphonPump", false),
    row(&["bật bơm vào", "mở bơm vào", "bơm nước vào"], "waterPump-In", true),
    row(&["tắt bơm vào", "dừng bơm vào", "ngắt bơm vào"], "waterPump-In", false),
    row(&["bật bơm ra", "mở bơm ra", "bơm nước ra"], "waterPump-Out", true),
    row(&["tắt bơm ra", "dừng bơm ra", "ngắt bơm ra"], "waterPump-Out", false),
    row(&["bật oxy", "mở oxy", "bơm oxy bật", "bơm oxy mở", "chạy oxy", "oxy bật", "oxy mở", "bật oxi", "mở oxi", "chạy oxi"], "oxygenPump", true),
    row(&["tắt oxy", "đóng oxy", "bơm oxy tắt", "bơm oxy đóng", "dừng oxy", "ngắt oxy", "oxy tắt", "oxy đóng", "tắt oxi", "đóng oxi", "ngắt oxi"], "oxygenPump", false),
    row(&["bật quạt oxy", "mở quạt oxy", "quạt oxy bật", "quạt oxy mở", "chạy quạt oxy", "bật quạt oxi", "mở quạt oxi", "quạt oxi bật", "quạt oxi mở", "chạy quạt oxi"], "oxygenFan", true),
    row(&["tắt quạt oxy", "đóng quạt oxy", "quạt oxy tắt", "quạt oxy đóng", "dừng quạt oxy", "ngắt quạt oxy", "tắt quạt oxi", "đóng quạt oxi", "quạt oxi tắt", "quạt oxi đóng", "dừng quạt oxi", "ngắt quạt oxi"], "oxygenFan", false),
    row(&["bật máy điện phân", "mở điện phân", "chạy điện phân"], "electrolyzer", true),
    row(&["tắt máy điện phân", "dừng điện phân", "ngắt điện phân"], "electrolyzer", false),
    row(&["bật đèn", "mở đèn", "sáng đèn", "bật chiếu sáng", "đèn bật", "đèn mở", "đèn sáng", "bật gen", "mở gen"], "lightingLamp", true),
    row(&["tắt đèn", "đóng đèn", "dừng đèn", "ngắt đèn", "tắt chiếu sáng", "đèn tắt", "đèn đóng", "tắt gen", "đóng gen"], "lightingLamp", false),
];

static EN_ROWS: &[PhraseRow] = &[
    row(&["turn on feeder", "start feeder", "feed fish", "start feeding"], "autoFeeder", true),
    row(&["turn off feeder", "stop feeder", "stop feeding"], "autoFeeder", false),
    row(&["turn on siphon", "start siphon", "siphon on"], "siphonPump", true),
    row(&["turn off siphon", "stop siphon", "siphon off"], "siphonPump", false),
    row(&["turn on pump in", "start pump in", "water in"], "waterPump-In", true),
    row(&["turn off pump in", "stop pump in"], "waterPump-In", false),
    row(&["turn on pump out", "start pump out", "water out"], "waterPump-Out", true),
    row(&["turn off pump out", "stop pump out"], "waterPump-Out", false),
    row(&["turn on oxygen", "start oxygen", "oxygen on"], "oxygenPump", true),
    row(&["turn off oxygen", "stop oxygen", "oxygen off"], "oxygenPump", false),
    row(&["turn on fan", "start fan", "fan on"], "oxygenFan", true),
    row(&["turn off fan", "stop fan", "fan off"], "oxygenFan", false),
    row(&["turn on electrolyzer", "start electrolyzer"], "electrolyzer", true),
    row(&["turn off electrolyzer", "stop electrolyzer"], "electrolyzer", false),
    row(&["turn on light", "light on", "lights on"], "lightingLamp", true),
    row(&["turn off light", "light off", "lights off"], "lightingLamp", false),
];

fn rows(language: Language) -> &'static [PhraseRow] {
    match language {
        Language::Vi => VI_ROWS,
        Language::En => EN_ROWS,
    }
}

/// Device on/off commands for `language`, addressed against the controller's
/// registry. Phrases for a device the active profile lacks still register and
/// answer "cannot control".
pub fn build_device_commands(language: Language, controller: &Controller) -> Vec<VoiceCommand> {
    rows(language)
        .iter()
        .filter_map(|r| {
            let (primary, variants) = r.keywords.split_first()?;
            let index = controller.registry().index_of_id(r.device_id);
            let controller = controller.clone();
            let on = r.on;
            Some(VoiceCommand::new(primary, variants, move || {
                let controller = controller.clone();
                async move {
                    let Some(index) = index else {
                        return Ok(Reply(language.phrase(Phrase::CannotControl).to_string()));
                    };
                    let phrase = match controller.set_device(index, on).await {
                        WriteOutcome::Written if on => Phrase::DeviceOn,
                        WriteOutcome::Written => Phrase::DeviceOff,
                        WriteOutcome::RolledBack => Phrase::ActionFailed,
                        WriteOutcome::NotReady => Phrase::CannotControl,
                    };
                    Ok(Reply(language.phrase(phrase).to_string()))
                }
            }))
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
