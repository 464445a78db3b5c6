#![allow(clippy::unwrap_used)]
#![allow(unused_crate_dependencies)]

mod common;

use std::collections::BTreeSet;

use mcp_firewall::detect::{Category, SpanKind};
use mcp_firewall::proxy::stream::StreamDetokenizer;
use mcp_firewall::token::{self, DEFAULT_TTL, TokenEntry, TokenRecord, Tokenizer};
use proptest::prelude::*;

use common::TEST_SALT;

fn record_with(entries: &[(&str, SpanKind)]) -> (TokenRecord, Vec<String>) {
    let tokenizer = Tokenizer::new(TEST_SALT.to_vec());
    let mut record = TokenRecord::new("c-stream", DEFAULT_TTL);
    let mut placeholders = Vec::new();

    for (original, kind) in entries {
        let placeholder = tokenizer.placeholder("c-stream", *kind, original);
        record.entries.insert(
            placeholder.clone(),
            TokenEntry {
                kind: *kind,
                original: (*original).to_owned(),
                created_at: time::OffsetDateTime::now_utc(),
            },
        );
        placeholders.push(placeholder);
    }

    (record, placeholders)
}

/// Splits `text` at the given byte offsets, snapped to char boundaries.
fn chunked(text: &str, cut_points: &[usize]) -> Vec<String> {
    let mut boundaries: Vec<usize> = cut_points
        .iter()
        .map(|&p| {
            let mut at = p % (text.len() + 1);
            while !text.is_char_boundary(at) {
                at -= 1;
            }
            at
        })
        .collect();
    boundaries.push(0);
    boundaries.push(text.len());
    boundaries.sort_unstable();
    boundaries.dedup();

    boundaries
        .windows(2)
        .map(|pair| text[pair[0]..pair[1]].to_owned())
        .collect()
}

proptest! {
    /// Property 10: for any decomposition of the upstream text into chunks,
    /// the concatenation of the emitted chunks equals the detokenization of
    /// the whole text.
    #[test]
    fn chunked_output_equals_whole_text_detokenization(
        cut_points in prop::collection::vec(0usize..500, 0..8),
        head in "\\PC{0,40}",
        middle in "\\PC{0,40}",
        tail in "\\PC{0,40}",
    ) {
        let (record, placeholders) = record_with(&[
            ("4532015112830366", SpanKind::CreditCard),
            ("alice@ex.com", SpanKind::Email),
        ]);
        let allow = BTreeSet::from([Category::Pii]);

        let text = format!("{head}{}{middle}{}{tail}", placeholders[0], placeholders[1]);

        let (expected, _) = token::substitute(&text, &record, &allow);

        let mut detok = StreamDetokenizer::new(record, allow);
        let mut produced = String::new();
        for chunk in chunked(&text, &cut_points) {
            produced.push_str(&detok.push(&chunk));
        }
        produced.push_str(&detok.flush());

        prop_assert_eq!(produced, expected);
    }

    /// No emitted chunk ever ends inside a placeholder: every prefix of the
    /// produced output contains either a whole placeholder image or none of
    /// its restored form.
    #[test]
    fn emitted_chunks_never_split_a_restored_value(cut_at in 1usize..60) {
        let (record, placeholders) = record_with(&[("4532015112830366", SpanKind::CreditCard)]);
        let placeholder = placeholders[0].clone();
        let allow = BTreeSet::from([Category::Pii]);

        let text = format!("card {placeholder} done");
        let mut at = cut_at % text.len();
        while !text.is_char_boundary(at) {
            at -= 1;
        }

        let mut detok = StreamDetokenizer::new(record, allow);
        let first = detok.push(&text[..at]);

        // Whatever was emitted so far must not contain a torn placeholder.
        prop_assert!(!first.contains('«') || first.contains('»'));
        // And never a partial card number.
        if !first.contains("4532015112830366") {
            prop_assert!(!first.contains("45320151"));
        }

        let mut rest = detok.push(&text[at..]);
        rest.push_str(&detok.flush());

        prop_assert_eq!(format!("{first}{rest}"), "card 4532015112830366 done");
    }
}

/// Scenario S6 at the detokenizer level: a placeholder split across two SSE
/// delta frames is reassembled with no partial leak.
#[test]
fn placeholder_across_two_frames() {
    let (record, placeholders) = record_with(&[("4532015112830366", SpanKind::CreditCard)]);
    let placeholder = placeholders[0].clone();
    let allow = BTreeSet::from([Category::Pii]);

    let (frame_one, frame_two) = placeholder.split_at(12);

    let mut detok = StreamDetokenizer::new(record, allow);

    let first = detok.push(&format!("the card is {frame_one}"));
    assert_eq!(first, "the card is ");

    let second = detok.push(frame_two);
    let flushed = detok.flush();

    assert_eq!(format!("{first}{second}{flushed}"), "the card is 4532015112830366");
    assert_eq!(detok.restored(), 1);
}
