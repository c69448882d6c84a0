//! The modifier catalog (spec.md §4.6) as a tagged variant with a
//! compile-time "critical" subset, per spec.md §9's design note — the
//! Python original dispatches by name through a `dict` of bound methods;
//! here the token string is parsed once into an enum and matched.

/// A named side-effect token valid inside triggers, actions, or sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    IgnoreStates,
    WatchStates,
    TriggerStart,
    TriggerStop,
    SleepRandom,
    RandomStart,
    RandomStop,
    Count,
    TimeCmd,
}

impl Modifier {
    /// Parses a trigger/action/sequence token into a [`Modifier`], if it
    /// names one.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "IGNORE_STATES" => Some(Modifier::IgnoreStates),
            "WATCH_STATES" => Some(Modifier::WatchStates),
            "TRIGGER_START" => Some(Modifier::TriggerStart),
            "TRIGGER_STOP" => Some(Modifier::TriggerStop),
            "SLEEP_RANDOM" => Some(Modifier::SleepRandom),
            "RANDOM_START" => Some(Modifier::RandomStart),
            "RANDOM_STOP" => Some(Modifier::RandomStop),
            "COUNT" => Some(Modifier::Count),
            "TIMECMD" => Some(Modifier::TimeCmd),
            _ => None,
        }
    }

    /// The token string this modifier was declared under.
    pub fn token(self) -> &'static str {
        match self {
            Modifier::IgnoreStates => "IGNORE_STATES",
            Modifier::WatchStates => "WATCH_STATES",
            Modifier::TriggerStart => "TRIGGER_START",
            Modifier::TriggerStop => "TRIGGER_STOP",
            Modifier::SleepRandom => "SLEEP_RANDOM",
            Modifier::RandomStart => "RANDOM_START",
            Modifier::RandomStop => "RANDOM_STOP",
            Modifier::Count => "COUNT",
            Modifier::TimeCmd => "TIMECMD",
        }
    }

    /// Critical modifiers run first and unconditionally when a state's
    /// triggers fire (spec.md §4.4) — they are the only way to re-enable
    /// triggers/watching once disabled.
    pub fn is_critical(self) -> bool {
        matches!(self, Modifier::WatchStates | Modifier::TriggerStart)
    }
}
