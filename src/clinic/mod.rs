pub mod controller;
pub mod provider;
pub mod sessions;
pub mod view;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

pub const INITIAL_LIVES: i32 = 3;
pub const POINTS_PER_QUESTION: u32 = 100;
pub const STREAK_BONUS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub patient_name: String,
    #[serde(rename = "appearance")]
    pub observations: Observations,
    pub complaint: String,
    pub correct_diagnosis: String,
    #[serde(rename = "wrongOptions")]
    pub distractors: [String; 3],
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Observations {
    pub face: String,
    pub tongue: String,
    pub pulse: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidCase {
    #[error("correct diagnosis is blank")]
    BlankDiagnosis,
    #[error("distractor {0:?} is listed twice")]
    DuplicateDistractor(String),
    #[error("distractor {0:?} equals the correct diagnosis")]
    DistractorIsCorrect(String),
}

impl Case {
    pub fn validate(&self) -> Result<(), InvalidCase> {
        let correct = self.correct_diagnosis.trim();
        if correct.is_empty() {
            return Err(InvalidCase::BlankDiagnosis);
        }

        for (i, distractor) in self.distractors.iter().enumerate() {
            let distractor = distractor.trim();
            if distractor == correct {
                return Err(InvalidCase::DistractorIsCorrect(distractor.to_string()));
            }
            if self.distractors[..i].iter().any(|d| d.trim() == distractor) {
                return Err(InvalidCase::DuplicateDistractor(distractor.to_string()));
            }
        }
        Ok(())
    }

    pub fn is_correct(&self, choice: &str) -> bool {
        choice.trim() == self.correct_diagnosis.trim()
    }

    pub fn shuffled_options<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut options = Vec::with_capacity(self.distractors.len() + 1);
        options.push(self.correct_diagnosis.clone());
        options.extend(self.distractors.iter().cloned());
        options.shuffle(rng);
        options
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub initial_lives: i32,
    pub base_points: u32,
    pub streak_bonus: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            initial_lives: INITIAL_LIVES,
            base_points: POINTS_PER_QUESTION,
            streak_bonus: STREAK_BONUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameStats {
    pub score: u32,
    pub lives: i32,
    pub streak: u32,
}

impl GameStats {
    pub fn new(rules: &Rules) -> Self {
        Self {
            score: 0,
            lives: rules.initial_lives,
            streak: 0,
        }
    }

    pub fn record_correct(&mut self, rules: &Rules) -> u32 {
        let points = rules
            .base_points
            .saturating_add(self.streak.saturating_mul(rules.streak_bonus));
        self.score = self.score.saturating_add(points);
        self.streak += 1;
        points
    }

    pub fn record_wrong(&mut self) {
        self.lives -= 1;
        self.streak = 0;
    }

    pub fn remaining_lives(&self) -> usize {
        self.lives.max(0) as usize
    }

    pub fn is_out_of_lives(&self) -> bool {
        self.lives <= 0
    }
}
