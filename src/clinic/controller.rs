use super::provider::CaseError;
use super::{Case, GameStats, Rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Menu,
    Loading,
    Playing,
    Feedback,
    GameOver,
}

/// Identifies one outstanding case fetch. Only the most recently issued
/// token is accepted back by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct { points: u32 },
    Wrong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Adopted,
    Aborted,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Loading(RequestToken),
    GameOver,
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Menu,
    Loading {
        request: RequestToken,
    },
    Playing {
        case: Case,
        options: Vec<String>,
    },
    Feedback {
        case: Case,
        options: Vec<String>,
        selected: String,
        verdict: Verdict,
    },
    GameOver,
}

// Transitions that make no sense in the current state are ignored.
#[derive(Debug, Clone)]
pub struct GameController {
    rules: Rules,
    stats: GameStats,
    phase: Phase,
    last_request: u64,
}

impl Default for GameController {
    fn default() -> Self {
        Self::new(Rules::default())
    }
}

impl GameController {
    pub fn new(rules: Rules) -> Self {
        Self {
            stats: GameStats::new(&rules),
            rules,
            phase: Phase::Menu,
            last_request: 0,
        }
    }

    pub fn state(&self) -> GameState {
        match self.phase {
            Phase::Menu => GameState::Menu,
            Phase::Loading { .. } => GameState::Loading,
            Phase::Playing { .. } => GameState::Playing,
            Phase::Feedback { .. } => GameState::Feedback,
            Phase::GameOver => GameState::GameOver,
        }
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    pub fn case(&self) -> Option<&Case> {
        match &self.phase {
            Phase::Playing { case, .. } | Phase::Feedback { case, .. } => Some(case),
            _ => None,
        }
    }

    pub fn options(&self) -> &[String] {
        match &self.phase {
            Phase::Playing { options, .. } | Phase::Feedback { options, .. } => options,
            _ => &[],
        }
    }

    pub fn selected(&self) -> Option<&str> {
        match &self.phase {
            Phase::Feedback { selected, .. } => Some(selected),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match &self.phase {
            Phase::Feedback { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Option<RequestToken> {
        match self.phase {
            Phase::Menu | Phase::GameOver => {
                self.stats = GameStats::new(&self.rules);
                Some(self.begin_loading())
            }
            _ => None,
        }
    }

    pub fn finish_loading(
        &mut self,
        token: RequestToken,
        fetched: Result<Case, CaseError>,
    ) -> LoadOutcome {
        match self.phase {
            Phase::Loading { request } if request == token => {}
            _ => return LoadOutcome::Stale,
        }

        match fetched {
            Ok(case) => {
                let options = case.shuffled_options(&mut rand::thread_rng());
                self.phase = Phase::Playing { case, options };
                LoadOutcome::Adopted
            }
            Err(err) => {
                log::warn!("Case fetch failed, back to the menu: {}", err);
                self.phase = Phase::Menu;
                LoadOutcome::Aborted
            }
        }
    }

    pub fn answer(&mut self, choice: &str) -> Option<Verdict> {
        let (case, options) = match &self.phase {
            Phase::Playing { case, options } => (case, options),
            _ => return None,
        };
        let selected = options.iter().find(|o| o.trim() == choice.trim())?.clone();

        let verdict = if case.is_correct(&selected) {
            Verdict::Correct {
                points: self.stats.record_correct(&self.rules),
            }
        } else {
            self.stats.record_wrong();
            Verdict::Wrong
        };

        if let Phase::Playing { case, options } = std::mem::take(&mut self.phase) {
            self.phase = Phase::Feedback {
                case,
                options,
                selected,
                verdict,
            };
        }
        Some(verdict)
    }

    pub fn next(&mut self) -> Option<Advance> {
        if !matches!(self.phase, Phase::Feedback { .. }) {
            return None;
        }
        if self.stats.is_out_of_lives() {
            self.phase = Phase::GameOver;
            Some(Advance::GameOver)
        } else {
            Some(Advance::Loading(self.begin_loading()))
        }
    }

    /// Drops whatever is on screen and returns to the menu. Any outstanding
    /// fetch becomes stale.
    pub fn abandon(&mut self) {
        self.phase = Phase::Menu;
    }

    fn begin_loading(&mut self) -> RequestToken {
        self.last_request += 1;
        let request = RequestToken(self.last_request);
        self.phase = Phase::Loading { request };
        request
    }
}
