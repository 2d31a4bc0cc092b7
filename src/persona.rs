//! Interviewer personas
//!
//! A persona is opaque to the session: its instruction and voice are passed
//! straight into the Live API setup message.

/// Prebuilt Live API voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
        }
    }

    /// Case-insensitive lookup by voice name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub system_instruction: String,
    pub voice: Voice,
}

const HR_PANEL: &str = "You are a senior HR officer on a public-sector bank's recruitment \
interview panel. Interview the candidate for a Probationary Officer role. Ask one question \
at a time, start with a short self-introduction request, then cover motivation for banking, \
strengths and weaknesses, and situational questions about customers. Keep replies short and \
spoken, react to what the candidate says, and give brief feedback when they ask for it.";

const BANKING_AWARENESS: &str = "You are a banking-awareness examiner on a bank recruitment \
interview panel. Ask the candidate one question at a time about monetary policy, the central \
bank's tools, financial inclusion schemes, digital payments and recent banking news. If an \
answer is wrong or incomplete, correct it in one or two sentences before moving on. Speak \
concisely.";

const STRESS_INTERVIEW: &str = "You are a strict interviewer running a stress interview for a \
bank officer role. Challenge the candidate's answers politely but firmly, ask follow-up \
questions quickly, and occasionally interrupt long answers. Stay professional, never insult \
the candidate, and keep every turn to a few sentences.";

impl Persona {
    pub fn new(name: impl Into<String>, system_instruction: impl Into<String>, voice: Voice) -> Self {
        Self {
            name: name.into(),
            system_instruction: system_instruction.into(),
            voice,
        }
    }

    pub fn builtin() -> Vec<Persona> {
        vec![
            Persona::new("hr", HR_PANEL, Voice::Kore),
            Persona::new("awareness", BANKING_AWARENESS, Voice::Puck),
            Persona::new("stress", STRESS_INTERVIEW, Voice::Fenrir),
        ]
    }

    /// Find a built-in persona by name.
    pub fn find(name: &str) -> Option<Persona> {
        Self::builtin()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }
}
