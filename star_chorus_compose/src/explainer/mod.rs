// Explainer: control surface and gate report to text.
//
// - `atoms.rs`: bucket tables, planet and element tints.
// - `realizer.rs`: success and fail-closed text, sandbox hints.
// - `overlay.rs`: natal/current contrast phrases.
//
// `explanation_doc` wraps realized text into the three-section explanation
// document carried by the response.

pub mod atoms;
pub mod overlay;
pub mod realizer;

use star_chorus_protocol::{EXPLANATION_SPEC, Explanation, ExplanationSection, TextExplainer};

pub use atoms::{ExplainerAtoms, generate_atoms};
pub use overlay::contrast_phrases;
pub use realizer::{ExplainInput, FORBIDDEN_ADJECTIVES, NatalContext, contains_forbidden, realize};

/// Theme, Details and Bullets sections.
pub fn explanation_doc(text: &TextExplainer) -> Explanation {
    let bullets = text.bullets.iter().map(|b| format!("- {b}")).collect::<Vec<_>>().join("\n");
    Explanation {
        spec: EXPLANATION_SPEC.to_string(),
        sections: vec![
            ExplanationSection {
                title: "Theme".into(),
                text: text.short.clone(),
            },
            ExplanationSection {
                title: "Details".into(),
                text: text.long.clone(),
            },
            ExplanationSection {
                title: "Bullets".into(),
                text: bullets,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_has_three_sections() {
        let text = TextExplainer {
            short: "s".into(),
            long: "l".into(),
            bullets: vec!["a".into(), "b".into()],
            template_id: "s0.l0".into(),
            seed: "abc".into(),
        };
        let doc = explanation_doc(&text);
        assert_eq!(doc.spec, "UnifiedSpecV1.1");
        let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Theme", "Details", "Bullets"]);
        assert_eq!(doc.sections[2].text, "- a\n- b");
    }
}
