//! Export-control classifier: a keyword-count scorer over a fixed
//! aviation/ITAR vocabulary.
//!
//! The classifier never rejects or modifies a payload. It emits a single
//! advisory span covering the whole payload when enough keywords match; the
//! policy engine is its only consumer.

use regex::Regex;

use crate::detect::{Span, SpanKind};

pub const DEFAULT_THRESHOLD: usize = 2;

const KEYWORDS: &[&str] = &[
    "eVTOL",
    "VTOL",
    "ITAR",
    "EAR",
    "ECCN",
    "FAA",
    "airworthiness",
    "type certificate",
    "flight control",
    "avionics",
    "autopilot",
    "aerodynamic",
    "propulsion",
    "composite",
    "airframe",
    "payload capacity",
    "V-speed",
    "flight envelope",
    "export control",
    "dual-use",
    "munitions list",
    "rotorcraft",
    "nacelle",
];

pub struct Classifier {
    matcher: Regex,
    threshold: usize,
}

impl Classifier {
    /// `extra_keywords` merge into the built-in vocabulary.
    pub fn new(extra_keywords: &[String], threshold: usize) -> Self {
        let alternatives = KEYWORDS
            .iter()
            .copied()
            .map(regex::escape)
            .chain(extra_keywords.iter().map(|kw| regex::escape(kw)))
            .collect::<Vec<_>>()
            .join("|");
        let source = format!(r"(?i)\b(?:{alternatives})\b");

        Self {
            matcher: Regex::new(&source).expect("keywords are escaped, pattern compiles"),
            threshold: threshold.max(1),
        }
    }

    /// Advisory span over the whole payload, or `None` below the threshold.
    pub fn classify(&self, payload: &str) -> Option<Span> {
        let matches = self.matcher.find_iter(payload).count();

        if matches < self.threshold {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let confidence = (matches as f64 / (self.threshold * 3) as f64).min(1.0);

        Some(Span::new(0, payload.len(), SpanKind::ExportControl, confidence))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&[], DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Category;

    #[test]
    fn below_threshold_stays_silent() {
        let classifier = Classifier::default();
        assert!(classifier.classify("routine avionics maintenance note").is_none());
        assert!(classifier.classify("nothing aeronautical here").is_none());
    }

    #[test]
    fn advisory_span_covers_whole_payload() {
        let classifier = Classifier::default();
        let payload = "ITAR review for the eVTOL flight control stack";
        let span = classifier.classify(payload).expect("three keywords present");

        assert_eq!((span.start, span.end), (0, payload.len()));
        assert_eq!(span.category, Category::ExportControl);
        assert!(span.confidence > 0.0 && span.confidence <= 1.0);
    }

    #[test]
    fn matching_is_case_insensitive_and_word_bounded() {
        let classifier = Classifier::default();
        // "year" and "clear" must not count as EAR.
        assert!(classifier.classify("this year the result was clear").is_none());
        assert!(classifier.classify("itar and eccn controls").is_some());
    }

    #[test]
    fn confidence_saturates_at_one() {
        let classifier = Classifier::default();
        let payload = "ITAR EAR ECCN FAA avionics autopilot propulsion airframe";
        let span = classifier.classify(payload).expect("many keywords");
        assert!((span.confidence - 1.0).abs() < f64::EPSILON);
    }
}
