use std::fmt;

/// One diagnostic message and how many times in a row it was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub repeats: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repeats {
            0 | 1 => write!(f, "{}", self.message),
            n => write!(f, "{} (repeated {} times)", self.message, n),
        }
    }
}

/// Collects non-fatal decode warnings for a single call.
///
/// Consecutive identical messages are folded into one entry with a count,
/// so a corrupt file with thousands of bad events yields a short summary.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(last) = self.entries.last_mut() {
            if last.message == message {
                last.repeats += 1;
                return;
            }
        }
        self.entries.push(Diagnostic {
            message,
            repeats: 1,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Emit every entry through `log::warn!`, prefixed with `context`.
    pub fn log(&self, context: &str) {
        for entry in &self.entries {
            log::warn!("{}: {}", context, entry);
        }
    }
}
