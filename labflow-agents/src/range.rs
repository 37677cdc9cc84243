//! ABOUTME: Reference-range parsing and marker value assessment
//! ABOUTME: Tolerates OCR'd range text; descriptive ranges are not interpretable

/// A parsed reference range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceRange {
    /// `min <= x <= max`, e.g. `3.5 - 5.0`.
    Closed { min: f64, max: f64 },
    /// `x < max`, e.g. `<100` or `≤ 2.0`.
    UpperBound { max: f64 },
    /// `x > min`, e.g. `>40` or `≥ 60`.
    LowerBound { min: f64 },
}

/// How a marker's value sits against its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAssessment {
    Normal,
    /// Outside the range but within the tolerance band of the violated
    /// boundary (25 % of the range width, or of the bound itself for open
    /// ranges).
    BorderlineLow,
    BorderlineHigh,
    Low,
    High,
    /// No range, an unparseable range, or a non-numeric value.
    NotInterpretable,
}

impl MarkerAssessment {
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            Self::Low | Self::High | Self::BorderlineLow | Self::BorderlineHigh
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::BorderlineLow => "borderline low",
            Self::BorderlineHigh => "borderline high",
            Self::Low => "low",
            Self::High => "high",
            Self::NotInterpretable => "not interpretable",
        }
    }
}

/// Parse reference-range text as extracted from a report.
///
/// Accepted forms: closed ranges with a hyphen or en-dash, `<`/`≤` upper
/// bounds, `>`/`≥` lower bounds, and the malformed `<a - b` OCR artifact
/// (treated as `< max(a, b)`). Descriptive text (`varies`,
/// `depending on...`) yields `None`.
pub fn parse_reference_range(text: &str) -> Option<ReferenceRange> {
    let normalized = normalize(text);
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = strip_bound_prefix(trimmed, &["<=", "<"]) {
        let max = extract_numbers(rest)
            .into_iter()
            .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.max(n))))?;
        return Some(ReferenceRange::UpperBound { max });
    }

    if let Some(rest) = strip_bound_prefix(trimmed, &[">=", ">"]) {
        let min = extract_numbers(rest).into_iter().next()?;
        return Some(ReferenceRange::LowerBound { min });
    }

    let numbers = extract_numbers(trimmed);
    if let [a, b] = numbers[..] {
        if has_separating_hyphen(trimmed) {
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            return Some(ReferenceRange::Closed { min, max });
        }
    }

    None
}

/// Assess a verbatim marker value against its raw range text.
pub fn assess(value: &str, reference_range: Option<&str>) -> MarkerAssessment {
    let Some(range_text) = reference_range else {
        return MarkerAssessment::NotInterpretable;
    };
    let Some(range) = parse_reference_range(range_text) else {
        return MarkerAssessment::NotInterpretable;
    };
    let Some(x) = numeric_value(value) else {
        return MarkerAssessment::NotInterpretable;
    };
    classify(x, &range)
}

/// Classify a numeric value against a parsed range.
pub fn classify(x: f64, range: &ReferenceRange) -> MarkerAssessment {
    match *range {
        ReferenceRange::Closed { min, max } => {
            let tolerance = 0.25 * (max - min);
            if x < min {
                if min - x <= tolerance {
                    MarkerAssessment::BorderlineLow
                } else {
                    MarkerAssessment::Low
                }
            } else if x > max {
                if x - max <= tolerance {
                    MarkerAssessment::BorderlineHigh
                } else {
                    MarkerAssessment::High
                }
            } else {
                MarkerAssessment::Normal
            }
        }
        ReferenceRange::UpperBound { max } => {
            if x < max {
                MarkerAssessment::Normal
            } else if x - max <= 0.25 * max.abs() {
                MarkerAssessment::BorderlineHigh
            } else {
                MarkerAssessment::High
            }
        }
        ReferenceRange::LowerBound { min } => {
            if x > min {
                MarkerAssessment::Normal
            } else if min - x <= 0.25 * min.abs() {
                MarkerAssessment::BorderlineLow
            } else {
                MarkerAssessment::Low
            }
        }
    }
}

/// First numeric token of a value string, e.g. `"14.5"` or `"<5"` -> 5.0.
pub fn numeric_value(value: &str) -> Option<f64> {
    extract_numbers(value).into_iter().next()
}

fn normalize(text: &str) -> String {
    text.replace(['–', '—'], "-")
        .replace('≤', "<=")
        .replace('≥', ">=")
}

fn strip_bound_prefix<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
}

fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse::<f64>() {
                numbers.push(n);
            }
            current.clear();
        }
    }
    if let Ok(n) = current.parse::<f64>() {
        numbers.push(n);
    }
    numbers
}

fn has_separating_hyphen(text: &str) -> bool {
    text.char_indices().any(|(i, c)| {
        c == '-'
            && text[..i].chars().any(|p| p.is_ascii_digit())
            && text[i + 1..].chars().any(|n| n.is_ascii_digit())
    })
}
