//! Confidence scoring for the grounded chat endpoint.
//!
//! Similarity scores are mapped onto a piecewise-linear confidence curve
//! pivoting at the configured floor: an average at the floor lands exactly
//! on 0.5, everything above is stretched into [0.5, 1.0], everything below
//! is compressed into [0.0, 0.5).

use crate::rag::engine::RetrievedChunk;

/// Compute a confidence value in [0.0, 1.0] from the similarity scores of
/// the retrieved chunks. No chunks means no evidence, which is zero
/// confidence.
pub fn confidence_score(scores: &[f32], floor: f32) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }

    let avg = scores.iter().sum::<f32>() / scores.len() as f32;
    if avg >= floor {
        let scaled = 0.5 + 0.5 * (avg - floor) / (1.0 - floor);
        scaled.min(1.0)
    } else {
        let scaled = 0.5 * avg / floor;
        scaled.max(0.0)
    }
}

/// Human-readable citation label for a retrieved chunk.
pub fn format_citation(chunk: &RetrievedChunk) -> String {
    format!(
        "{} - {} - {} (Page/Section: {})",
        chunk.module, chunk.chapter, chunk.subsection, chunk.page_reference
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: f32 = 0.3;

    #[test]
    fn no_scores_means_zero_confidence() {
        assert_eq!(confidence_score(&[], FLOOR), 0.0);
    }

    #[test]
    fn average_at_floor_is_half() {
        let confidence = confidence_score(&[FLOOR], FLOOR);
        assert!((confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn perfect_scores_cap_at_one() {
        let confidence = confidence_score(&[1.0, 1.0], FLOOR);
        assert!((confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn below_floor_is_compressed_under_half() {
        let confidence = confidence_score(&[0.15], FLOOR);
        assert!((confidence - 0.25).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_monotone_in_average_score() {
        let mut previous = -1.0f32;
        for avg in [0.0, 0.1, 0.29, 0.3, 0.31, 0.6, 1.0] {
            let confidence = confidence_score(&[avg], FLOOR);
            assert!(confidence >= previous, "not monotone at avg {}", avg);
            previous = confidence;
        }
    }

    #[test]
    fn citation_includes_taxonomy_and_page() {
        let chunk = RetrievedChunk {
            chunk_id: "c1".to_string(),
            content: String::new(),
            module: "Module 1".to_string(),
            chapter: "The Robotic Nervous System".to_string(),
            subsection: "Nodes and Topics".to_string(),
            source_type: "textbook".to_string(),
            page_reference: "module-1/nodes".to_string(),
            score: 0.9,
        };
        assert_eq!(
            format_citation(&chunk),
            "Module 1 - The Robotic Nervous System - Nodes and Topics (Page/Section: module-1/nodes)"
        );
    }
}
