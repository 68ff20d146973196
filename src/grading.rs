use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LetterGrade {
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    D,
    F,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 10] = [
        Self::A,
        Self::AMinus,
        Self::BPlus,
        Self::B,
        Self::BMinus,
        Self::CPlus,
        Self::C,
        Self::CMinus,
        Self::D,
        Self::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AMinus => "A-",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::BMinus => "B-",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::CMinus => "C-",
            Self::D => "D",
            Self::F => "F",
        }
    }

    pub fn is_passing(self) -> bool {
        self != Self::F
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bound (inclusive) of each band, best first. Anything below the last
/// bound is an F.
const LADDER: [(f64, LetterGrade); 9] = [
    (96.0, LetterGrade::A),
    (90.0, LetterGrade::AMinus),
    (85.0, LetterGrade::BPlus),
    (80.0, LetterGrade::B),
    (75.0, LetterGrade::BMinus),
    (70.0, LetterGrade::CPlus),
    (65.0, LetterGrade::C),
    (60.0, LetterGrade::CMinus),
    (50.0, LetterGrade::D),
];

/// The one grade ladder. Every score, subject average and overall average is
/// graded through here.
pub fn letter_grade(score: f64) -> LetterGrade {
    LADDER
        .iter()
        .find(|(floor, _)| score >= *floor)
        .map(|(_, g)| *g)
        .unwrap_or(LetterGrade::F)
}

/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Scores are stored with two decimals.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentage rounded to one decimal; 0 when the denominator is empty.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_off_1_decimal(100.0 * part as f64 / whole as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_boundaries() {
        assert_eq!(letter_grade(100.0), LetterGrade::A);
        assert_eq!(letter_grade(96.0), LetterGrade::A);
        assert_eq!(letter_grade(95.99), LetterGrade::AMinus);
        assert_eq!(letter_grade(90.0), LetterGrade::AMinus);
        assert_eq!(letter_grade(89.99), LetterGrade::BPlus);
        assert_eq!(letter_grade(85.0), LetterGrade::BPlus);
        assert_eq!(letter_grade(80.0), LetterGrade::B);
        assert_eq!(letter_grade(75.0), LetterGrade::BMinus);
        assert_eq!(letter_grade(70.0), LetterGrade::CPlus);
        assert_eq!(letter_grade(65.0), LetterGrade::C);
        assert_eq!(letter_grade(60.0), LetterGrade::CMinus);
        assert_eq!(letter_grade(59.99), LetterGrade::D);
        assert_eq!(letter_grade(50.0), LetterGrade::D);
        assert_eq!(letter_grade(49.99), LetterGrade::F);
        assert_eq!(letter_grade(0.0), LetterGrade::F);
    }

    #[test]
    fn ladder_is_monotone_non_increasing() {
        let mut prev = letter_grade(100.0);
        let mut s = 10_000i64;
        while s >= 0 {
            let g = letter_grade(s as f64 / 100.0);
            assert!(g >= prev, "grade improved going down at {}", s);
            prev = g;
            s -= 1;
        }
    }

    #[test]
    fn grade_strings_match_report_labels() {
        let labels: Vec<&str> = LetterGrade::ALL.iter().map(|g| g.as_str()).collect();
        assert_eq!(
            labels,
            vec!["A", "A-", "B+", "B", "B-", "C+", "C", "C-", "D", "F"]
        );
        assert!(!LetterGrade::F.is_passing());
        assert!(LetterGrade::D.is_passing());
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(82.44), 82.4);
        assert_eq!(round_off_2_decimals(87.456), 87.46);
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[80.0, 90.0]), Some(85.0));
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(0, 0), 0.0);
    }
}
