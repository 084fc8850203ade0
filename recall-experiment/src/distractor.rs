//! Arithmetic problems for the distractor period.

use rand::Rng;

use crate::config::MathConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathProblem {
    /// Signed single-digit terms; only the first is never negative.
    pub terms: Vec<i32>,
}

impl MathProblem {
    pub fn generate<R: Rng + ?Sized>(math: &MathConfig, rng: &mut R) -> Self {
        let n = math.num_vars.max(1) as usize;
        let terms = (0..n)
            .map(|i| {
                let digit = rng.random_range(1..=9);
                if i > 0 && math.plus_and_minus && rng.random_bool(0.5) {
                    -digit
                } else {
                    digit
                }
            })
            .collect();
        Self { terms }
    }

    pub fn answer(&self) -> i32 {
        self.terms.iter().sum()
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, term) in self.terms.iter().enumerate() {
            match (i, term.is_negative()) {
                (0, _) => out.push_str(&term.to_string()),
                (_, true) => out.push_str(&format!(" - {}", term.abs())),
                (_, false) => out.push_str(&format!(" + {term}")),
            }
        }
        out.push_str(" = ");
        out
    }

    pub fn is_correct(&self, response: &str) -> bool {
        response.trim().parse::<i32>() == Ok(self.answer())
    }
}
