// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Named entities must come out of correction exactly as they went in

use anyhow::Result;
use bubble_ocr::text::entities::{preserve_entities, restore_entities};
use bubble_ocr::text::{
    DictionarySpellCorrector, Entity, EntityLabel, EntityRecognizer, FrequencyDictionary,
    NoEntities, RuleBasedGrammar, TextCorrector,
};
use std::sync::Arc;

struct FixedEntities(Vec<Entity>);

impl EntityRecognizer for FixedEntities {
    fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        Ok(self
            .0
            .iter()
            .filter(|e| text.contains(&e.text))
            .cloned()
            .collect())
    }
}

fn corrector(entities: Arc<dyn EntityRecognizer>) -> TextCorrector {
    let dictionary = FrequencyDictionary::from_counts([
        ("i", 1000),
        ("think", 300),
        ("is", 900),
        ("an", 700),
        ("idiot", 20),
        ("login", 50),
        ("call", 120),
        ("professor", 40),
        ("now", 400),
    ]);
    TextCorrector::new(
        entities,
        Arc::new(RuleBasedGrammar),
        Arc::new(DictionarySpellCorrector::new(dictionary)),
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_grammar_fixes_around_protected_name() {
    let entities = Arc::new(FixedEntities(vec![Entity::new(
        "Wolverine",
        EntityLabel::Person,
    )]));
    let out = corrector(entities)
        .correct(&strings(&["i think Wolverine is a idiot"]))
        .await
        .unwrap();
    assert_eq!(out, strings(&["I think Wolverine is an idiot"]));
}

#[tokio::test]
async fn test_name_close_to_dictionary_word_is_kept() {
    let input = strings(&["call Logan now"]);

    let unprotected = corrector(Arc::new(NoEntities)).correct(&input).await.unwrap();
    assert_eq!(unprotected, strings(&["call login now"]));

    let entities = Arc::new(FixedEntities(vec![Entity::new("Logan", EntityLabel::Person)]));
    let protected = corrector(entities).correct(&input).await.unwrap();
    assert_eq!(protected, strings(&["call Logan now"]));
}

#[tokio::test]
async fn test_batch_keeps_length_and_order() {
    let entities = Arc::new(FixedEntities(vec![Entity::new(
        "Xavier Institute",
        EntityLabel::Organization,
    )]));
    let input = strings(&["profesor", "???", "call Xavier Institute now"]);
    let out = corrector(entities).correct(&input).await.unwrap();
    assert_eq!(
        out,
        strings(&["professor", "???", "call Xavier Institute now"])
    );
}

#[test]
fn test_overlapping_names_restore_in_full() {
    let entities = vec![
        Entity::new("Peter", EntityLabel::Person),
        Entity::new("Peter Parker", EntityLabel::Person),
    ];
    let text = "Peter Parker and Peter";
    let (protected, placeholders) = preserve_entities(text, &entities);
    assert!(!protected.contains("Peter"));
    assert_eq!(placeholders.len(), 2);
    assert_eq!(restore_entities(&protected, &placeholders), text);
}
