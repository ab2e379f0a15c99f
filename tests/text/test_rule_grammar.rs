// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Built-in grammar rules through the session interface

use bubble_ocr::text::grammar::{apply_matches, check_rules};
use bubble_ocr::text::{GrammarProvider, RuleBasedGrammar};

#[tokio::test]
async fn test_rule_session_reports_matches() {
    let mut session = RuleBasedGrammar.acquire().await.unwrap();
    let text = "wait , i need a apple";
    let matches = session.check(text).await.unwrap();
    session.close().await.unwrap();

    let rules: Vec<&str> = matches.iter().map(|m| m.rule_id.as_str()).collect();
    assert!(rules.contains(&"SPACE_BEFORE_PUNCTUATION"));
    assert!(rules.contains(&"I_LOWERCASE"));
    assert!(rules.contains(&"EN_A_VS_AN"));
    assert_eq!(apply_matches(text, &matches), "wait, I need an apple");
}

#[test]
fn test_clean_sentence_has_no_matches() {
    assert!(check_rules("I need a hero, not an excuse.").is_empty());
}

#[test]
fn test_rules_leave_placeholders_alone() {
    let text = "a __ENT0__ arrived";
    assert!(check_rules(text).is_empty());
}
