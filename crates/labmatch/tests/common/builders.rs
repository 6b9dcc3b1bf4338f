//! Profiles used across the integration tests.

#![allow(dead_code)]

use labmatch::{Candidate, Subject};

/// MS student in ML and CV with 20 hours a week.
pub fn ml_student(id: &str) -> Subject {
    Subject::new(id)
        .with_interests(["ML", "CV"])
        .with_methods(["DeepLearning"])
        .with_degree_level("MS")
        .with_hours_per_week(20)
}

/// Candidate that scores 80 against [`ml_student`].
pub fn ml_professor(id: &str) -> Candidate {
    Candidate::new(id)
        .with_name(format!("Prof. {}", id))
        .with_areas(["ML", "NLP"])
        .with_methods(["DeepLearning", "Stats"])
        .with_preferred_degree_levels(["MS", "PhD"])
}

/// Candidate sharing nothing with [`ml_student`].
pub fn unrelated_professor(id: &str) -> Candidate {
    Candidate::new(id)
        .with_name(format!("Prof. {}", id))
        .with_areas(["Chemistry"])
        .with_methods(["Titration"])
        .with_preferred_degree_levels(["PhD"])
}
